use tokio::sync::Mutex as AsyncMutex;

/// Serializes tests that read or write `RELAY_*` environment variables.
/// Use `.blocking_lock()` in sync tests and `.lock().await` in async tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Runs `f` with `vars` set, removing them again afterwards.
/// The caller must already hold `ENV_LOCK`.
pub fn with_env_vars<T>(vars: &[(&str, &str)], f: impl FnOnce() -> T) -> T {
    for (key, value) in vars {
        std::env::set_var(key, value);
    }
    let result = f();
    for (key, _) in vars {
        std::env::remove_var(key);
    }
    result
}
