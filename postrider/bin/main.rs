use std::path::PathBuf;

use anyhow::Context;
use postrider::Postrider;

const CONFIG_ENV: &str = "POSTRIDER_CONFIG";
const CONFIG_PATHS: [&str; 2] = [
    "./postrider.config.ron",
    "/etc/postrider/postrider.config.ron",
];

/// Locate a config file: the environment variable wins and must point at an
/// existing file; otherwise the well-known paths are probed in order.
fn find_config_file() -> anyhow::Result<Option<PathBuf>> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(path);
        anyhow::ensure!(
            path.is_file(),
            "{CONFIG_ENV} points to {}, which is not a file",
            path.display()
        );
        return Ok(Some(path));
    }

    Ok(CONFIG_PATHS.iter().map(PathBuf::from).find(|p| p.is_file()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match find_config_file()? {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            ron::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => Postrider::default(),
    };

    config.run().await
}
