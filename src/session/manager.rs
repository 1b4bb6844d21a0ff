//! Catalog lifecycle: single-flight reloads, staleness and retry

use crate::decipher::CatalogState;
use crate::error::DescrambleError;
use crate::session::source::ScriptSource;
use futures::future::{BoxFuture, FutureExt, Shared};
use moka::future::Cache;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

type ReloadResult = Result<Arc<CatalogState>, Arc<DescrambleError>>;
type ReloadHandle = Shared<BoxFuture<'static, ReloadResult>>;

/// Session tuning knobs
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Age after which the active catalog is reloaded before further use
    pub reload_interval: Duration,
    /// How long decoded n values stay cached
    pub n_cache_ttl: Duration,
    /// Upper bound on distinct cached n values
    pub n_cache_capacity: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            reload_interval: Duration::from_secs(24 * 60 * 60),
            n_cache_ttl: Duration::from_secs(60 * 60),
            n_cache_capacity: 1024,
        }
    }
}

/// Externally observable lifecycle of the session's catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No catalog has ever been compiled
    Empty,
    /// A reload is in flight
    Loading,
    /// A catalog is active and within its reload interval
    Ready,
    /// A catalog is active but due for replacement before further use
    Stale,
}

struct Inner {
    catalog: Option<Arc<CatalogState>>,
    last_reload: Option<Instant>,
    in_flight: Option<ReloadHandle>,
    needs_reload: bool,
}

/// Owns the active [`CatalogState`] and replaces it on demand.
///
/// Any number of callers may ask for the catalog concurrently; a reload runs
/// at most once at a time and every waiter observes the same resulting
/// state. A reload forced while one is in flight marks a single extra cycle
/// that runs after the current one finishes.
pub struct Session<S: ScriptSource> {
    source: Arc<S>,
    config: SessionConfig,
    inner: Arc<Mutex<Inner>>,
    n_cache: Cache<String, String>,
}

impl<S: ScriptSource> Session<S> {
    pub fn new(source: S) -> Self {
        Self::with_config(source, SessionConfig::default())
    }

    pub fn with_config(source: S, config: SessionConfig) -> Self {
        let n_cache = Cache::builder()
            .max_capacity(config.n_cache_capacity)
            .time_to_live(config.n_cache_ttl)
            .build();
        Session {
            source: Arc::new(source),
            config,
            inner: Arc::new(Mutex::new(Inner {
                catalog: None,
                last_reload: None,
                in_flight: None,
                needs_reload: false,
            })),
            n_cache,
        }
    }

    /// Current lifecycle state; never blocks on a reload
    pub fn state(&self) -> SessionState {
        let inner = self.inner.lock().unwrap();
        if inner.in_flight.is_some() {
            SessionState::Loading
        } else if inner.catalog.is_none() {
            SessionState::Empty
        } else if self.is_stale(&inner) {
            SessionState::Stale
        } else {
            SessionState::Ready
        }
    }

    /// Peek at the active catalog without triggering anything
    pub fn current_catalog(&self) -> Option<Arc<CatalogState>> {
        self.inner.lock().unwrap().catalog.clone()
    }

    /// Mark the active catalog stale so the next use replaces it first.
    /// Called when the platform rejects output produced with it.
    pub fn report_decode_failure(&self) {
        warn!("active catalog reported stale; next use will reload");
        self.inner.lock().unwrap().last_reload = None;
    }

    /// Replace the catalog. Joins a reload already in flight; with `force`
    /// set, additionally marks one more cycle to run after it.
    pub async fn reload(&self, force: bool) -> Result<Arc<CatalogState>, DescrambleError> {
        let handle = self.trigger_reload(force);
        handle.await.map_err(|e| unshare(&e))
    }

    /// Hand out the active catalog, reloading first when the session is
    /// empty or stale
    pub async fn catalog(&self) -> Result<Arc<CatalogState>, DescrambleError> {
        let handle = {
            let inner = self.inner.lock().unwrap();
            match &inner.in_flight {
                Some(h) => Some(h.clone()),
                None => {
                    if let Some(catalog) = &inner.catalog {
                        if !self.is_stale(&inner) {
                            return Ok(Arc::clone(catalog));
                        }
                    }
                    None
                }
            }
        };
        let handle = handle.unwrap_or_else(|| self.trigger_reload(false));
        handle.await.map_err(|e| unshare(&e))
    }

    /// Replay the signature program from the active catalog
    pub async fn decode_signature(&self, sig: &str) -> Result<String, DescrambleError> {
        let catalog = self.catalog().await?;
        catalog.decode_signature(sig)
    }

    /// Evaluate the n-transform from the active catalog. Decoded values are
    /// cached; identical inputs within the TTL skip the replay entirely.
    pub async fn decode_n(&self, value: &str) -> Result<String, DescrambleError> {
        if let Some(hit) = self.n_cache.get(value).await {
            debug!(n = value, "n cache hit");
            return Ok(hit);
        }
        let catalog = self.catalog().await?;
        let decoded = catalog.decode_n(value);
        self.n_cache
            .insert(value.to_string(), decoded.clone())
            .await;
        Ok(decoded)
    }

    /// Run `op` against the active catalog, granting one reload plus one
    /// retry when it fails with a stale-catalog signal. Any other error, or
    /// a second stale signal, propagates unchanged.
    pub async fn retrying<T, F, Fut>(&self, mut op: F) -> Result<T, DescrambleError>
    where
        F: FnMut(Arc<CatalogState>) -> Fut,
        Fut: Future<Output = Result<T, DescrambleError>>,
    {
        for attempt in 0..2 {
            let catalog = self.catalog().await?;
            match op(catalog).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_stale_signal() && attempt == 0 => {
                    warn!(error = %e, "stale catalog signal; reloading and retrying once");
                    self.report_decode_failure();
                }
                Err(e) => return Err(e),
            }
        }
        Err(DescrambleError::Generic(
            "retry budget exhausted".to_string(),
        ))
    }

    fn is_stale(&self, inner: &Inner) -> bool {
        match inner.last_reload {
            Some(at) => at.elapsed() >= self.config.reload_interval,
            None => true,
        }
    }

    /// Start a reload unless one is already running. The returned handle is
    /// shared; it resolves once the reload, plus any extra cycle flagged
    /// while it ran, has finished.
    fn trigger_reload(&self, force: bool) -> ReloadHandle {
        let mut inner = self.inner.lock().unwrap();
        if let Some(handle) = inner.in_flight.clone() {
            if force {
                debug!("reload already in flight; flagging one more cycle");
                inner.needs_reload = true;
            }
            return handle;
        }

        let source = Arc::clone(&self.source);
        let shared_inner = Arc::clone(&self.inner);
        let n_cache = self.n_cache.clone();
        let fut: BoxFuture<'static, ReloadResult> = async move {
            loop {
                {
                    let mut inner = shared_inner.lock().unwrap();
                    inner.needs_reload = false;
                    inner.last_reload = Some(Instant::now());
                }

                let result = load_catalog(source.as_ref()).await;

                let run_again = {
                    let mut inner = shared_inner.lock().unwrap();
                    match &result {
                        Ok(catalog) => {
                            inner.catalog = Some(Arc::clone(catalog));
                            // cached n values belong to the superseded catalog
                            n_cache.invalidate_all();
                            debug!("catalog replaced");
                        }
                        Err(e) => {
                            // leave any previous catalog in place but stale
                            inner.last_reload = None;
                            warn!(error = %e, "catalog reload failed");
                        }
                    }
                    if inner.needs_reload {
                        true
                    } else {
                        inner.in_flight = None;
                        false
                    }
                };
                if !run_again {
                    return result;
                }
            }
        }
        .boxed();

        let handle = fut.shared();
        inner.in_flight = Some(handle.clone());
        // drive the reload even if every waiter drops
        tokio::spawn(handle.clone().map(|_| ()));
        handle
    }
}

async fn load_catalog<S: ScriptSource>(source: &S) -> ReloadResult {
    let script = source.fetch_script().await.map_err(Arc::new)?;
    let catalog = CatalogState::compile(&script).map_err(Arc::new)?;
    Ok(Arc::new(catalog))
}

/// Turn a shared reload error back into an owned one. Variants whose payload
/// cannot be cloned collapse into `Generic` with the same message.
fn unshare(e: &DescrambleError) -> DescrambleError {
    match e {
        DescrambleError::StructuralMismatch(s) => DescrambleError::StructuralMismatch(s.clone()),
        DescrambleError::SignatureApply(s) => DescrambleError::SignatureApply(s.clone()),
        DescrambleError::StaleCatalog(s) => DescrambleError::StaleCatalog(s.clone()),
        DescrambleError::StateNotFound => DescrambleError::StateNotFound,
        DescrambleError::StateFieldMissing(f) => DescrambleError::StateFieldMissing(f),
        other => DescrambleError::Generic(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decipher::testscript::{synthetic_script, synthetic_script_with, SIG_CALLS_DEFAULT};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    struct FakeSource {
        script: Mutex<String>,
        fetches: AtomicUsize,
        delay: Duration,
    }

    impl FakeSource {
        fn new(script: String) -> Self {
            Self::with_delay(script, Duration::from_millis(30))
        }

        fn with_delay(script: String, delay: Duration) -> Self {
            FakeSource {
                script: Mutex::new(script),
                fetches: AtomicUsize::new(0),
                delay,
            }
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }

        fn set_script(&self, script: String) {
            *self.script.lock().unwrap() = script;
        }
    }

    #[async_trait]
    impl ScriptSource for FakeSource {
        async fn fetch_script(&self) -> Result<String, DescrambleError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            sleep(self.delay).await;
            Ok(self.script.lock().unwrap().clone())
        }
    }

    fn session_over_fake() -> (Arc<Session<Arc<FakeSource>>>, Arc<FakeSource>) {
        let source = Arc::new(FakeSource::new(synthetic_script(SIG_CALLS_DEFAULT)));
        let session = Arc::new(Session::new(Arc::clone(&source)));
        (session, source)
    }

    #[async_trait]
    impl ScriptSource for Arc<FakeSource> {
        async fn fetch_script(&self) -> Result<String, DescrambleError> {
            self.as_ref().fetch_script().await
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_compile() {
        let (session, source) = session_over_fake();
        assert_eq!(session.state(), SessionState::Empty);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let session = Arc::clone(&session);
            tasks.push(tokio::spawn(async move { session.catalog().await }));
        }

        let mut catalogs = Vec::new();
        for task in tasks {
            catalogs.push(task.await.unwrap().unwrap());
        }

        assert_eq!(source.fetches(), 1);
        for catalog in &catalogs[1..] {
            assert!(Arc::ptr_eq(&catalogs[0], catalog));
        }
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn force_during_flight_runs_exactly_one_extra_cycle() {
        let (session, source) = session_over_fake();

        let first = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.reload(false).await })
        };
        sleep(Duration::from_millis(10)).await;
        assert_eq!(session.state(), SessionState::Loading);

        // joins the in-flight reload and flags one more cycle
        session.reload(true).await.unwrap();
        first.await.unwrap().unwrap();

        assert_eq!(source.fetches(), 2);
        assert_eq!(session.state(), SessionState::Ready);

        // a fresh catalog within its interval is reused as-is
        session.catalog().await.unwrap();
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_catalog() {
        let (session, source) = session_over_fake();
        let good = session.catalog().await.unwrap();

        source.set_script("var nothing = here;".to_string());
        let err = session.reload(true).await.unwrap_err();
        assert!(err.is_structural());

        // the old catalog survives, but is stale until a reload succeeds
        let kept = session.current_catalog().unwrap();
        assert!(Arc::ptr_eq(&good, &kept));
        assert_eq!(session.state(), SessionState::Stale);

        source.set_script(synthetic_script(SIG_CALLS_DEFAULT));
        let fresh = session.catalog().await.unwrap();
        assert!(!Arc::ptr_eq(&good, &fresh));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn failed_first_load_leaves_session_empty() {
        let source = Arc::new(FakeSource::new("garbage".to_string()));
        let session = Session::new(Arc::clone(&source));

        let err = session.catalog().await.unwrap_err();
        assert!(err.is_structural());
        assert_eq!(session.state(), SessionState::Empty);
        assert!(session.current_catalog().is_none());
    }

    #[tokio::test]
    async fn decode_n_reuses_cached_values() {
        let (session, source) = session_over_fake();

        let first = session.decode_n("abcdef").await.unwrap();
        assert_eq!(first, "defabc");
        let second = session.decode_n("abcdef").await.unwrap();
        assert_eq!(second, first);
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn catalog_replacement_drops_cached_n_values() {
        let (session, source) = session_over_fake();
        assert_eq!(session.decode_n("abcdef").await.unwrap(), "defabc");

        // replace the script with one whose n routine is the identity; the
        // cached value from the old catalog must not survive the reload
        source.set_script(synthetic_script_with(SIG_CALLS_DEFAULT, ""));
        session.reload(true).await.unwrap();
        assert_eq!(session.decode_n("abcdef").await.unwrap(), "abcdef");
    }

    #[tokio::test]
    async fn stale_signal_reloads_once_then_retries() {
        let (session, source) = session_over_fake();
        let calls = AtomicUsize::new(0);

        let result = session
            .retrying(|_catalog| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(DescrambleError::StaleCatalog("403".to_string()))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // initial compile plus the stale-triggered reload
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn second_stale_signal_propagates() {
        let (session, _source) = session_over_fake();

        let err = session
            .retrying(|_catalog| async {
                Err::<(), _>(DescrambleError::StaleCatalog("403".to_string()))
            })
            .await
            .unwrap_err();

        assert!(err.is_stale_signal());
    }

    #[tokio::test]
    async fn non_stale_errors_are_not_retried() {
        let (session, _source) = session_over_fake();
        let calls = AtomicUsize::new(0);

        let err = session
            .retrying(|_catalog| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(DescrambleError::Generic("boom".to_string())) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DescrambleError::Generic(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
