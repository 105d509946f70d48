use siasyncd::daemon::{DaemonConfig, DaemonRuntime};
use siasyncd::sync::record::SyncState;
use siasyncd::sync::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Status,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--status" => mode = CliMode::Status,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

async fn print_status(config: &DaemonConfig) -> anyhow::Result<()> {
    let store = RecordStore::open(&config.db_path()).await?;
    let records = store.list_all().await?;
    let pending = records
        .iter()
        .filter(|record| !record.state.is_resting())
        .count();
    let failed = records
        .iter()
        .filter(|record| {
            matches!(
                record.state,
                SyncState::UploadFailed | SyncState::DownloadFailed
            )
        })
        .count();
    if pending == 0 {
        println!("synced: {} tracked, {} failed", records.len(), failed);
    } else {
        println!(
            "syncing: {pending} of {} pending, {failed} failed",
            records.len()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    match parse_cli_mode(std::env::args())? {
        CliMode::Status => {
            let config = DaemonConfig::from_env()?;
            return print_status(&config).await;
        }
        CliMode::Help => {
            println!("Usage: siasyncd [--status]");
            println!("  --status   Print sync state of the tracked directory and exit");
            return Ok(());
        }
        CliMode::Run => {}
    }
    let config = DaemonConfig::from_env()?;
    let daemon = DaemonRuntime::bootstrap(config).await?;
    daemon.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cli_mode_defaults_to_run() {
        let mode = parse_cli_mode(vec!["siasyncd".to_string()]).unwrap();
        assert_eq!(mode, CliMode::Run);
    }

    #[test]
    fn parse_cli_mode_supports_status() {
        let mode = parse_cli_mode(vec!["siasyncd".to_string(), "--status".to_string()]).unwrap();
        assert_eq!(mode, CliMode::Status);
    }

    #[test]
    fn parse_cli_mode_rejects_unknown_arguments() {
        assert!(parse_cli_mode(vec!["siasyncd".to_string(), "--bogus".to_string()]).is_err());
    }
}
