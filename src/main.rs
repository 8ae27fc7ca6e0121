use diskform::{Config, run};
use tokio::runtime::{Builder, Runtime};

fn build_runtime(worker_threads: usize) -> std::io::Result<Runtime> {
    let mut builder = Builder::new_multi_thread();
    builder.enable_all();
    // 0 keeps tokio's default of one worker per core
    if worker_threads > 0 {
        builder.worker_threads(worker_threads);
    }
    builder.build()
}

fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    build_runtime(config.general.worker_threads)?.block_on(run(config))
}
