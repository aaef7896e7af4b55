use std::panic;

/// Decode threads catch their own panics; only log them
const WORKER_THREAD_PREFIX: &str = "pageflow-";

pub fn initialize_panic_handler() {
    better_panic::install();

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let thread = std::thread::current();
        let name = thread.name().unwrap_or("<unnamed>");
        log::error!("Panic in thread {name}: {panic_info}");
        log::logger().flush();

        if !name.starts_with(WORKER_THREAD_PREFIX) {
            default_hook(panic_info);
        }
    }));
}
