//! Running CPU heavy operations off the caller's thread.
//!
//! A [`CryptoJob`] owns copies of everything it needs. Secret inputs are held
//! in [`Zeroizing`] buffers so they are wiped when the job is dropped, whether
//! it finished, failed or was never run.
//!
//! [`JobRunner::run_sync`] executes a job on the calling thread and returns
//! the result directly. [`JobRunner::spawn`] moves it onto the worker pool
//! and hands back a [`JobHandle`] future that resolves once the job is done.
//! Errors of a spawned job are only ever observed through its handle.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures::channel::oneshot;
use once_cell::sync::OnceCell;
use zeroize::Zeroizing;

#[cfg(feature = "logging")]
use crate::log::{debug, trace};

use crate::{kdf, key, rand, ByteSource, CryptoError, KeyObject, KeyPairOptions, ScryptOptions};

/// A unit of CPU bound work.
pub trait CryptoJob: Send + 'static {
    /// The value produced on success.
    type Output: Send + 'static;

    /// A short name used in logs.
    fn name(&self) -> &'static str;

    /// Runs the job to completion.
    fn run(self) -> Result<Self::Output, CryptoError>;
}

/// Runs jobs synchronously or on a worker pool.
pub struct JobRunner {
    pool: rayon::ThreadPool,
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

static GLOBAL_RUNNER: OnceCell<JobRunner> = OnceCell::new();

impl JobRunner {
    /// Creates a runner with its own pool. Zero threads picks the rayon
    /// default.
    pub fn new(threads: usize) -> Result<Self, CryptoError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("crypto-job-{i}"))
            // A panicking job drops its sender, its handle resolves as canceled.
            .panic_handler(|_| {})
            .build()
            .map_err(|e| CryptoError::OperationFailed(e.to_string()))?;

        Ok(Self { pool })
    }

    /// The process wide runner, created on first use.
    pub fn global() -> Result<&'static JobRunner, CryptoError> {
        GLOBAL_RUNNER.get_or_try_init(|| JobRunner::new(0))
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `job` on the calling thread.
    pub fn run_sync<J: CryptoJob>(&self, job: J) -> Result<J::Output, CryptoError> {
        #[cfg(feature = "logging")]
        trace!(job = job.name(), "running job synchronously");

        job.run()
    }

    /// Queues `job` on the worker pool.
    pub fn spawn<J: CryptoJob>(&self, job: J) -> JobHandle<J::Output> {
        let (sender, receiver) = oneshot::channel();

        #[cfg(feature = "logging")]
        debug!(job = job.name(), "queueing job");

        self.pool.spawn(move || {
            #[cfg(feature = "logging")]
            let name = job.name();

            let result = job.run();

            #[cfg(feature = "logging")]
            trace!(job = name, ok = result.is_ok(), "job finished");

            // The receiver may have been dropped, nobody is waiting then.
            _ = sender.send(result);
        });

        JobHandle { receiver }
    }

    /// Runs `job` on the pool and passes the result to `callback` on the
    /// worker thread, or runs it synchronously when there is no callback.
    ///
    /// Returns the result only in the synchronous case.
    pub fn dispatch<J, F>(&self, job: J, callback: Option<F>) -> Option<Result<J::Output, CryptoError>>
    where
        J: CryptoJob,
        F: FnOnce(Result<J::Output, CryptoError>) + Send + 'static,
    {
        match callback {
            Some(callback) => {
                self.pool.spawn(move || callback(job.run()));
                None
            }
            None => Some(self.run_sync(job)),
        }
    }
}

/// Completion handle of a spawned job.
#[derive(Debug)]
#[must_use = "a job handle does nothing unless polled"]
pub struct JobHandle<T> {
    receiver: oneshot::Receiver<Result<T, CryptoError>>,
}

impl<T> Future for JobHandle<T> {
    type Output = Result<T, CryptoError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(CryptoError::Canceled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Fills a buffer with random bytes.
#[derive(Debug, Clone, Copy)]
pub struct RandomBytesJob {
    len: usize,
}

impl RandomBytesJob {
    /// Creates a job producing `len` bytes.
    pub fn new(len: usize) -> Self {
        Self { len }
    }
}

impl CryptoJob for RandomBytesJob {
    type Output = Vec<u8>;

    fn name(&self) -> &'static str {
        "random_bytes"
    }

    fn run(self) -> Result<Vec<u8>, CryptoError> {
        rand::random_vec(self.len)
    }
}

/// PBKDF2 derivation.
pub struct Pbkdf2Job {
    password: Zeroizing<Vec<u8>>,
    salt: Zeroizing<Vec<u8>>,
    iterations: u32,
    key_len: usize,
    digest: String,
}

impl Pbkdf2Job {
    /// Copies the inputs into a new job.
    pub fn new(
        password: &ByteSource<'_>,
        salt: &ByteSource<'_>,
        iterations: u32,
        key_len: usize,
        digest: &str,
    ) -> Self {
        Self {
            password: Zeroizing::new(password.to_vec()),
            salt: Zeroizing::new(salt.to_vec()),
            iterations,
            key_len,
            digest: digest.to_string(),
        }
    }
}

impl std::fmt::Debug for Pbkdf2Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pbkdf2Job")
            .field("iterations", &self.iterations)
            .field("key_len", &self.key_len)
            .field("digest", &self.digest)
            .finish_non_exhaustive()
    }
}

impl CryptoJob for Pbkdf2Job {
    type Output = Zeroizing<Vec<u8>>;

    fn name(&self) -> &'static str {
        "pbkdf2"
    }

    fn run(self) -> Result<Self::Output, CryptoError> {
        kdf::pbkdf2(
            &self.password,
            &self.salt,
            self.iterations,
            self.key_len,
            &self.digest,
        )
        .map(Zeroizing::new)
    }
}

/// scrypt derivation.
pub struct ScryptJob {
    password: Zeroizing<Vec<u8>>,
    salt: Zeroizing<Vec<u8>>,
    key_len: usize,
    options: ScryptOptions,
}

impl ScryptJob {
    /// Copies the inputs into a new job.
    pub fn new(
        password: &ByteSource<'_>,
        salt: &ByteSource<'_>,
        key_len: usize,
        options: ScryptOptions,
    ) -> Self {
        Self {
            password: Zeroizing::new(password.to_vec()),
            salt: Zeroizing::new(salt.to_vec()),
            key_len,
            options,
        }
    }
}

impl std::fmt::Debug for ScryptJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScryptJob")
            .field("key_len", &self.key_len)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl CryptoJob for ScryptJob {
    type Output = Zeroizing<Vec<u8>>;

    fn name(&self) -> &'static str {
        "scrypt"
    }

    fn run(self) -> Result<Self::Output, CryptoError> {
        kdf::scrypt(&self.password, &self.salt, self.key_len, &self.options).map(Zeroizing::new)
    }
}

/// Asymmetric key pair generation.
#[derive(Debug, Clone)]
pub struct KeyPairJob {
    options: KeyPairOptions,
}

impl KeyPairJob {
    /// Creates a job generating a pair with `options`.
    pub fn new(options: KeyPairOptions) -> Self {
        Self { options }
    }
}

impl CryptoJob for KeyPairJob {
    /// `(public, private)`.
    type Output = (KeyObject, KeyObject);

    fn name(&self) -> &'static str {
        "generate_key_pair"
    }

    fn run(self) -> Result<Self::Output, CryptoError> {
        key::generate_key_pair(&self.options)
    }
}
