use clap::{Parser, Subcommand};

mod commands;
mod util;

use commands::chat::ChatCommands;
use commands::forms::FormsCommands;
use util::Target;

#[derive(Parser)]
#[command(
    name = "agentdesk",
    version,
    about = "AgentDesk CLI: stage and answer workflow forms, relay chat messages"
)]
struct Cli {
    /// API base URL
    #[arg(long, env = "AGENTDESK_API_URL", default_value = "http://localhost:5008")]
    api_url: String,

    /// Session key sent as x-session-id (defaults to the server's view of your IP)
    #[arg(long, env = "AGENTDESK_SESSION")]
    session: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Pending form operations
    Forms {
        #[command(subcommand)]
        command: FormsCommands,
    },
    /// Chat relay operations
    Chat {
        #[command(subcommand)]
        command: ChatCommands,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let target = Target {
        api_url: &cli.api_url,
        session: cli.session.as_deref(),
    };

    let code = match cli.command {
        Commands::Health => commands::health::run(&target).await,
        Commands::Forms { command } => commands::forms::run(&target, command).await,
        Commands::Chat { command } => commands::chat::run(&target, command).await,
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_nested_form_command() {
        let cli = Cli::try_parse_from([
            "agentdesk",
            "--session",
            "tab-1",
            "forms",
            "notify",
            "--type",
            "input",
            "--question",
            "Email?",
        ])
        .expect("valid arguments");
        assert_eq!(cli.session.as_deref(), Some("tab-1"));
        assert!(matches!(
            cli.command,
            Commands::Forms {
                command: FormsCommands::Notify {
                    form_type: commands::forms::FormType::Input,
                    ..
                }
            }
        ));
    }
}
