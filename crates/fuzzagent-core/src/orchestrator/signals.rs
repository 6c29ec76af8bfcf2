//! Signal-driven cancellation.
//!
//! The first SIGINT, SIGTERM or SIGHUP cancels the outstanding run through a
//! [`CancellationToken`]; any later signal is logged and ignored. Listeners
//! live in a [`SignalGuard`] scoped around the protected call.
//!
//! The guard saves each signal's disposition before listening and puts it
//! back on release or drop, so a signal arriving after the run behaves as it
//! did before the run started.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One-shot bridge from signals to the run's cancellation token.
#[derive(Debug)]
pub struct CancelTrigger {
    token: CancellationToken,
    fired: AtomicBool,
    ignored: AtomicUsize,
}

impl CancelTrigger {
    pub fn new(token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            token,
            fired: AtomicBool::new(false),
            ignored: AtomicUsize::new(0),
        })
    }

    /// Cancel the run. Returns `true` only for the first call.
    pub fn fire(&self, signal: &str) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            self.ignored.fetch_add(1, Ordering::SeqCst);
            debug!(signal, "cancellation already in flight, ignoring signal");
            return false;
        }
        warn!(signal, "caught signal, terminating fuzzing session");
        self.token.cancel();
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Signals received after the first one.
    pub fn ignored(&self) -> usize {
        self.ignored.load(Ordering::SeqCst)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Signal listeners feeding a [`CancelTrigger`]. Dropping the guard detaches
/// them and restores the saved dispositions; [`SignalGuard::release`] also
/// waits for the listeners to stop.
pub struct SignalGuard {
    listeners: Vec<JoinHandle<()>>,
    #[cfg(unix)]
    saved: Vec<disposition::Saved>,
}

impl SignalGuard {
    fn empty() -> Self {
        Self {
            listeners: Vec::new(),
            #[cfg(unix)]
            saved: Vec::new(),
        }
    }

    /// Listen for SIGINT, SIGTERM and SIGHUP.
    #[cfg(unix)]
    pub fn install(trigger: Arc<CancelTrigger>) -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        // On error the partially built guard drops and undoes what it holds.
        let mut guard = Self::empty();
        for (kind, signum, name) in [
            (SignalKind::interrupt(), libc::SIGINT, "SIGINT"),
            (SignalKind::terminate(), libc::SIGTERM, "SIGTERM"),
            (SignalKind::hangup(), libc::SIGHUP, "SIGHUP"),
        ] {
            let previous = disposition::Saved::read(signum)?;
            let mut stream = signal(kind)?;
            guard.saved.push(previous);
            disposition::ensure_runtime_handler(&previous)?;

            let trigger = trigger.clone();
            guard.listeners.push(tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    trigger.fire(name);
                }
            }));
        }
        Ok(guard)
    }

    /// Listen on a channel instead of OS signals. Each message names a signal.
    pub fn from_receiver(
        trigger: Arc<CancelTrigger>,
        mut signals: mpsc::UnboundedReceiver<&'static str>,
    ) -> Self {
        let listener = tokio::spawn(async move {
            while let Some(name) = signals.recv().await {
                trigger.fire(name);
            }
        });
        let mut guard = Self::empty();
        guard.listeners.push(listener);
        guard
    }

    pub fn is_active(&self) -> bool {
        self.listeners.iter().any(|l| !l.is_finished())
    }

    /// Stop listening, wait until every listener is gone and restore the
    /// dispositions saved at install.
    pub async fn release(mut self) {
        for listener in self.listeners.drain(..) {
            listener.abort();
            let _ = listener.await;
        }
        self.restore();
        debug!("signal handlers released");
    }

    fn restore(&mut self) {
        #[cfg(unix)]
        while let Some(saved) = self.saved.pop() {
            if let Err(e) = saved.apply() {
                warn!(signum = saved.signum(), error = %e, "failed to restore signal disposition");
            }
        }
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        for listener in &self.listeners {
            listener.abort();
        }
        self.restore();
    }
}

#[cfg(unix)]
mod disposition {
    use std::collections::HashMap;
    use std::io;
    use std::sync::{Mutex, OnceLock, PoisonError};

    /// A signal's `sigaction` as read at one point in time.
    #[derive(Clone, Copy)]
    pub(super) struct Saved {
        signum: libc::c_int,
        action: libc::sigaction,
    }

    impl Saved {
        pub(super) fn read(signum: libc::c_int) -> io::Result<Self> {
            // SAFETY: sigaction is plain old data; zeroed is a valid value.
            let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
            // SAFETY: a null new action only queries the current one.
            let rc = unsafe { libc::sigaction(signum, std::ptr::null(), &mut action) };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { signum, action })
        }

        pub(super) fn apply(&self) -> io::Result<()> {
            // SAFETY: the action was produced by sigaction for this signal.
            let rc = unsafe { libc::sigaction(self.signum, &self.action, std::ptr::null_mut()) };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        pub(super) fn signum(&self) -> libc::c_int {
            self.signum
        }

        fn handler(&self) -> libc::sighandler_t {
            self.action.sa_sigaction
        }
    }

    /// tokio's OS handler per signal, captured the first time tokio installs it.
    fn runtime_handlers() -> &'static Mutex<HashMap<libc::c_int, Saved>> {
        static HANDLERS: OnceLock<Mutex<HashMap<libc::c_int, Saved>>> = OnceLock::new();
        HANDLERS.get_or_init(Default::default)
    }

    /// tokio registers its OS handler only once per signal and process. After a
    /// previous guard restored the old disposition, put tokio's handler back.
    pub(super) fn ensure_runtime_handler(previous: &Saved) -> io::Result<()> {
        let current = Saved::read(previous.signum)?;
        let mut handlers = runtime_handlers()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if current.handler() != previous.handler() {
            handlers.insert(current.signum, current);
        } else if let Some(runtime) = handlers.get(&current.signum) {
            if runtime.handler() != current.handler() {
                runtime.apply()?;
            }
        }
        Ok(())
    }
}
