use std::path::PathBuf;

use fenceline_headless_app::app::HeadlessApp;

/// 用法：`frame-loop [config.toml] [frame count]`
fn main() -> anyhow::Result<()> {
    fenceline_crate_tools::init_log::init_log();
    let _client = tracy_client::Client::start();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().map(PathBuf::from);
    let frame_count = match args.next() {
        Some(count) => count.parse()?,
        None => 600,
    };

    let mut app = HeadlessApp::new(config_path.as_deref())?;
    app.run(frame_count)?;

    log::info!("end run.");
    Ok(())
}
