use clap::{Parser, Subcommand, ValueEnum};
use rookie_core::{SortKey, Status};

#[derive(Parser)]
#[command(author, version, about = "Download, extract and sideload catalog packages", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch the remote catalog and merge it into the local state
    Refresh,

    /// List catalog entries
    List {
        /// case-insensitive substring of the display name
        #[arg(long)]
        name: Option<String>,
        /// keep only entries in these statuses (repeatable)
        #[arg(long = "status", value_parser = parse_status)]
        statuses: Vec<Status>,
        #[arg(long, value_enum, default_value_t = SortArg::Date)]
        sort: SortArg,
        /// sort ascending instead of descending
        #[arg(long)]
        asc: bool,
    },

    /// Print the status of one release
    Status { release: String },

    /// Queue releases for download and follow them until they settle
    Download {
        #[arg(required = true)]
        releases: Vec<String>,
    },

    /// Cancel a queued download
    Cancel { release: String },

    /// Install an extracted release on the connected device
    Install { release: String },

    /// Remove a package from the connected device
    Uninstall { package: String },

    /// Delete the extracted copy of a release
    Remove { release: String },

    /// Poll the device, resume queued downloads and autosave until Ctrl-C
    Watch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SortArg {
    Date,
    Name,
    Size,
}

impl From<SortArg> for SortKey {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Date => SortKey::Date,
            SortArg::Name => SortKey::Name,
            SortArg::Size => SortKey::Size,
        }
    }
}

fn parse_status(s: &str) -> Result<Status, String> {
    s.parse::<Status>().map_err(|_| {
        let known: Vec<&str> = <Status as strum::IntoEnumIterator>::iter()
            .map(Status::as_str)
            .collect();
        format!("unknown status '{s}', expected one of: {}", known.join(", "))
    })
}
