//! Subcommands.

use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start every configured server and report how each one fared
    Servers {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the tools of all running servers
    Tools {
        /// Only this server's tools
        #[arg(short, long)]
        server: Option<String>,

        /// Print full descriptors as JSON
        #[arg(long)]
        json: bool,
    },

    /// Invoke one tool and print its result
    Call {
        /// Server that provides the tool
        server: String,

        /// Tool name
        tool: String,

        /// Arguments as a JSON object
        #[arg(short, long)]
        args: Option<String>,
    },
}
