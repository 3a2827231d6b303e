//! Session inspection commands

use clap::{Args, Subcommand};
use evidex_store::EvidenceStorage;

#[derive(Debug, Args)]
pub struct SessionsArgs {
    #[command(subcommand)]
    pub command: SessionsCommand,
}

#[derive(Debug, Subcommand)]
pub enum SessionsCommand {
    /// Ids of stored sessions
    List,
    /// Metadata of one session as JSON
    Show { session_id: String },
    /// Streaming sessions that can be resumed
    Resumable,
}

pub fn execute(storage: &EvidenceStorage, args: SessionsArgs) -> anyhow::Result<()> {
    match args.command {
        SessionsCommand::List => {
            for id in storage.list_sessions()? {
                println!("{}", id);
            }
        }
        SessionsCommand::Show { session_id } => {
            let metadata = storage.load_session_metadata(&session_id)?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        SessionsCommand::Resumable => {
            for manifest in evidex_store::streaming::list_resumable(storage.layout())? {
                println!(
                    "{}  session={}  files_processed={}  last_updated={}",
                    manifest.manifest_id,
                    manifest.session_id,
                    manifest.files_processed,
                    manifest.last_updated_at.to_rfc3339()
                );
            }
        }
    }
    Ok(())
}
