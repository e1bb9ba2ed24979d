//! Observes the server's plaintext handshake flight to learn which key
//! exchange group was negotiated. The engine does not report it.

const CONTENT_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_SERVER_HELLO: u8 = 2;
const HANDSHAKE_SERVER_KEY_EXCHANGE: u8 = 12;
const HANDSHAKE_SERVER_HELLO_DONE: u8 = 14;
const EXT_SUPPORTED_VERSIONS: u16 = 0x002b;
const EXT_KEY_SHARE: u16 = 0x0033;
const CURVE_TYPE_NAMED: u8 = 3;
/// Stop looking after this many bytes.
const MAX_SNIFF_LEN: usize = 64 * 1024;

/// Parameters of the ephemeral key exchange of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EphemeralKeyInfo {
    /// Key exchange type, e.g. `ECDH`.
    pub kind: &'static str,
    /// Group name, e.g. `X25519` or `prime256v1`.
    pub name: &'static str,
    /// Key size in bits.
    pub size: u32,
}

impl EphemeralKeyInfo {
    pub(crate) fn from_group(group: u16) -> Option<Self> {
        let (name, size) = match group {
            0x0017 => ("prime256v1", 256),
            0x0018 => ("secp384r1", 384),
            0x0019 => ("secp521r1", 521),
            0x001d => ("X25519", 253),
            0x001e => ("X448", 448),
            _ => return None,
        };
        Some(Self {
            kind: "ECDH",
            name,
            size,
        })
    }
}

/// Incremental parser for the server's first flight.
#[derive(Debug, Default)]
pub(crate) struct ServerHelloSniffer {
    records: Vec<u8>,
    handshake: Vec<u8>,
    seen: usize,
    group: Option<u16>,
    done: bool,
}

impl ServerHelloSniffer {
    pub(crate) fn key_info(&self) -> Option<EphemeralKeyInfo> {
        self.group.and_then(EphemeralKeyInfo::from_group)
    }

    /// Feeds bytes received from the server, in order.
    pub(crate) fn feed(&mut self, data: &[u8]) {
        if self.done {
            return;
        }
        self.seen += data.len();
        if self.seen > MAX_SNIFF_LEN {
            self.finish();
            return;
        }

        self.records.extend_from_slice(data);
        while !self.done && self.records.len() >= 5 {
            let len = u16::from_be_bytes([self.records[3], self.records[4]]) as usize;
            if self.records.len() < 5 + len {
                break;
            }
            let record: Vec<u8> = self.records.drain(..5 + len).collect();
            if record[0] == CONTENT_HANDSHAKE {
                self.handshake.extend_from_slice(&record[5..]);
                self.read_messages();
            } else {
                // ChangeCipherSpec or anything else ends the plaintext flight.
                self.finish();
            }
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.records = Vec::new();
        self.handshake = Vec::new();
    }

    fn read_messages(&mut self) {
        while !self.done && self.handshake.len() >= 4 {
            let len = u32::from_be_bytes([0, self.handshake[1], self.handshake[2], self.handshake[3]])
                as usize;
            if self.handshake.len() < 4 + len {
                return;
            }
            let message: Vec<u8> = self.handshake.drain(..4 + len).collect();
            let body = &message[4..];
            match message[0] {
                HANDSHAKE_SERVER_HELLO => {
                    let (group, tls13) = parse_server_hello(body).unwrap_or((None, false));
                    if group.is_some() {
                        self.group = group;
                    }
                    if tls13 {
                        // Everything after the ServerHello is encrypted.
                        self.finish();
                    }
                }
                HANDSHAKE_SERVER_KEY_EXCHANGE => {
                    if let [CURVE_TYPE_NAMED, hi, lo, ..] = body {
                        self.group = Some(u16::from_be_bytes([*hi, *lo]));
                    }
                    self.finish();
                }
                HANDSHAKE_SERVER_HELLO_DONE => self.finish(),
                _ => {}
            }
        }
    }
}

/// Returns the key share group and whether TLS 1.3 was selected.
fn parse_server_hello(body: &[u8]) -> Option<(Option<u16>, bool)> {
    let mut reader = Reader(body);
    reader.skip(2 + 32)?;
    let session_id_len = reader.u8()? as usize;
    reader.skip(session_id_len + 2 + 1)?;
    if reader.is_empty() {
        return Some((None, false));
    }

    let extensions_len = reader.u16()? as usize;
    let mut extensions = Reader(reader.take(extensions_len)?);
    let mut group = None;
    let mut tls13 = false;
    while !extensions.is_empty() {
        let kind = extensions.u16()?;
        let len = extensions.u16()? as usize;
        let mut data = Reader(extensions.take(len)?);
        match kind {
            EXT_SUPPORTED_VERSIONS => tls13 = data.u16()? == 0x0304,
            EXT_KEY_SHARE => group = Some(data.u16()?),
            _ => {}
        }
    }
    Some((group, tls13))
}

struct Reader<'a>(&'a [u8]);

impl<'a> Reader<'a> {
    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.0.len() < n {
            return None;
        }
        let (head, tail) = self.0.split_at(n);
        self.0 = tail;
        Some(head)
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }
}
