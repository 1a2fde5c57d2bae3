fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    #[cfg(feature = "tauri-app")]
    {
        src_tauri::run_tauri();
        return;
    }

    #[cfg(not(feature = "tauri-app"))]
    if let Err(err) = src_tauri::run() {
        eprintln!("failed to start pager-ops backend: {err}");
    }
}
