use std::process;

use warden::{cli, output, router};

fn main() {
    let cli = cli::parse();
    let json = cli.json;
    if let Err(err) = router::dispatch(cli) {
        process::exit(output::format_error(&err, json));
    }
}
