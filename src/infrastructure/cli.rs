use clap::{Parser, Subcommand};

use crate::utils::version;

#[derive(Parser, Debug)]
#[command(version = version(), about)]
pub struct Cli {
    #[arg(
        long,
        value_name = "MS",
        help = "Simulated request latency in milliseconds (overrides the config file)"
    )]
    pub latency_ms: Option<u64>,

    #[arg(short, long, help = "Also print logs to stderr")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Rename a user, showing the new name before the server confirms it
    UpdateUser {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        name: String,
        /// Make the server reject the update
        #[arg(long)]
        fail: bool,
    },
    /// Join a team; the team list only changes once the server confirms
    JoinTeam {
        #[arg(long)]
        team_id: String,
        #[arg(long)]
        user_id: String,
        /// Make the server reject the request
        #[arg(long)]
        fail: bool,
    },
    /// Leave a team, hiding it from the team list right away
    LeaveTeam {
        #[arg(long)]
        team_id: String,
        #[arg(long)]
        user_id: String,
        /// Make the server reject the request
        #[arg(long)]
        fail: bool,
    },
}

impl Command {
    pub fn should_fail(&self) -> bool {
        match self {
            Command::UpdateUser { fail, .. }
            | Command::JoinTeam { fail, .. }
            | Command::LeaveTeam { fail, .. } => *fail,
        }
    }
}
