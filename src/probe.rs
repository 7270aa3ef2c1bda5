use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub type Labels = BTreeMap<String, String>;

pub type ProbeResult = Result<(), ProbeError>;

/// The one capability a concrete check has to provide.
///
/// `execute` is called from the probe's own thread, never concurrently with
/// itself for the same probe. Long-running checks should watch
/// [`Context::done`] or poll [`Context::is_cancelled`] so that closing the
/// probe does not wait on them longer than necessary.
pub trait ProbeTarget: Send + Sync {
    fn execute(&self, ctx: &Context) -> ProbeResult;
}

pub struct FuncProbe<F>(F);

impl<F> FuncProbe<F>
where
    F: Fn(&Context) -> ProbeResult + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ProbeTarget for FuncProbe<F>
where
    F: Fn(&Context) -> ProbeResult + Send + Sync,
{
    fn execute(&self, ctx: &Context) -> ProbeResult {
        (self.0)(ctx)
    }
}

impl<F> From<FuncProbe<F>> for ProbeClass
where
    F: Fn(&Context) -> ProbeResult + Send + Sync + 'static,
{
    fn from(probe: FuncProbe<F>) -> Self {
        ProbeClass::new(probe)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ProbeErrorKind {
    Failed,
    Panicked,
    Cancelled,
    Dns,
    ConnectTimeout,
    ConnectRefused,
    ConnectOther,
    Tls,
    HttpTimeout,
    HttpStatus,
    UnexpectedBody,
    Io,
}

impl ProbeErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            ProbeErrorKind::Failed => "failed",
            ProbeErrorKind::Panicked => "panicked",
            ProbeErrorKind::Cancelled => "cancelled",
            ProbeErrorKind::Dns => "dns",
            ProbeErrorKind::ConnectTimeout => "connect_timeout",
            ProbeErrorKind::ConnectRefused => "connect_refused",
            ProbeErrorKind::ConnectOther => "connect_other",
            ProbeErrorKind::Tls => "tls",
            ProbeErrorKind::HttpTimeout => "http_timeout",
            ProbeErrorKind::HttpStatus => "http_status",
            ProbeErrorKind::UnexpectedBody => "unexpected_body",
            ProbeErrorKind::Io => "io",
        }
    }
}

impl fmt::Display for ProbeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{message}")]
pub struct ProbeError {
    pub kind: ProbeErrorKind,
    pub message: String,
}

impl ProbeError {
    pub fn new(kind: ProbeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::Failed, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ProbeErrorKind::Cancelled, "probe cancelled")
    }
}

impl From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        Self::new(ProbeErrorKind::Io, err.to_string())
    }
}

/// Execution context handed to [`ProbeTarget::execute`].
///
/// Cancellation is signalled by disconnecting the `done` channel, so a
/// target can `select!` on it next to its own I/O channels.
#[derive(Clone, Debug)]
pub struct Context {
    done: Receiver<()>,
    timeout: Duration,
}

impl Context {
    pub(crate) fn new(done: Receiver<()>, timeout: Duration) -> Self {
        Self { done, timeout }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(crossbeam_channel::never(), timeout)
    }

    pub fn cancellable(timeout: Duration) -> (Self, CancelHandle) {
        let (tx, rx) = crossbeam_channel::bounded(0);
        (Self::new(rx, timeout), CancelHandle { tx: Some(tx) })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }

    pub fn done(&self) -> &Receiver<()> {
        &self.done
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn sleep(&self, duration: Duration) -> ProbeResult {
        match self.done.recv_timeout(duration) {
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Ok(()),
            _ => Err(ProbeError::cancelled()),
        }
    }
}

pub struct CancelHandle {
    tx: Option<Sender<()>>,
}

impl CancelHandle {
    pub fn cancel(&mut self) {
        self.tx.take();
    }
}

#[derive(Clone)]
pub struct ProbeClass {
    target: Arc<dyn ProbeTarget>,
    class: String,
    labels: Labels,
}

impl ProbeClass {
    pub fn new(target: impl ProbeTarget + 'static) -> Self {
        Self::from_shared(Arc::new(target))
    }

    pub fn from_shared(target: Arc<dyn ProbeTarget>) -> Self {
        Self {
            target,
            class: String::new(),
            labels: Labels::new(),
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = class.into();
        self
    }

    /// Adds a class-level label; labels passed to `Prober::run` win on conflict.
    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub(crate) fn into_parts(self) -> (Arc<dyn ProbeTarget>, String, Labels) {
        (self.target, self.class, self.labels)
    }
}

impl fmt::Debug for ProbeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeClass")
            .field("class", &self.class)
            .field("labels", &self.labels)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn func_probe_forwards_result() {
        let ok = FuncProbe::new(|_: &Context| Ok(()));
        let failing = FuncProbe::new(|_: &Context| Err(ProbeError::failed("boom")));
        let ctx = Context::with_timeout(Duration::from_secs(1));

        assert!(ok.execute(&ctx).is_ok());
        let err = failing.execute(&ctx).expect_err("should fail");
        assert_eq!(err.kind, ProbeErrorKind::Failed);
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn cancel_handle_cancels_context_and_its_clones() {
        let (ctx, mut cancel) = Context::cancellable(Duration::from_secs(1));
        let clone = ctx.clone();
        assert!(!ctx.is_cancelled());

        cancel.cancel();
        assert!(ctx.is_cancelled());
        assert!(clone.is_cancelled());
        assert!(clone.done().recv().is_err());
    }

    #[test]
    fn dropping_cancel_handle_cancels() {
        let (ctx, cancel) = Context::cancellable(Duration::from_secs(1));
        drop(cancel);
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn sleep_returns_early_when_cancelled() {
        let (ctx, mut cancel) = Context::cancellable(Duration::from_secs(1));
        cancel.cancel();
        let started = Instant::now();
        let err = ctx.sleep(Duration::from_secs(30)).expect_err("cancelled");
        assert_eq!(err.kind, ProbeErrorKind::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn sleep_completes_without_cancellation() {
        let ctx = Context::with_timeout(Duration::from_secs(1));
        assert!(ctx.sleep(Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn probe_class_collects_metadata() {
        let class = ProbeClass::from(FuncProbe::new(|_: &Context| Ok(())))
            .with_class("http")
            .with_label("region", "eu");
        assert_eq!(class.class(), "http");
        assert_eq!(class.labels().get("region").map(String::as_str), Some("eu"));
    }
}
