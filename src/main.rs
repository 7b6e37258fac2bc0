//! Triggers one tally command and exits.

use tally::cli;
use tally::cli::options::Options;

#[tokio::main]
async fn main() {
    let options = Options::from_args();
    if let Err(e) = cli::process(options).await {
        eprintln!("{}", e);
        ::std::process::exit(1);
    }
}
