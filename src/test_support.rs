use tokio::sync::Mutex as AsyncMutex;

/// Held by every test that sets or clears `TALKSHELL_*` variables.
/// Sync tests take it with `.blocking_lock()`, async tests with `.lock().await`.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());
