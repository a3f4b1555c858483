/// The fnhost binary.

use std::env::current_dir;
use std::process::exit;
use clap::{App, crate_authors, crate_version};
use log::error;
use fnhost::{Body, Config, Context, ExitError, Server};
use fnhost::log::Logger;

/// The built-in function: it echoes the request body back.
fn echo(_context: &Context, body: Option<Body>) -> Option<Body> {
    body
}

// Since `main` with a result currently insists on printing a message, but
// in our case we only get an `ExitError` if all is said and done, we make our
// own, more quiet version.
fn _main() -> Result<(), ExitError> {
    Logger::init()?;
    let cur_dir = match current_dir() {
        Ok(dir) => dir,
        Err(err) => {
            error!(
                "Fatal: cannot get current directory ({}). Aborting.",
                err
            );
            return Err(ExitError::Generic);
        }
    };
    let matches = Config::config_args(
        App::new("fnhost")
            .version(crate_version!())
            .author(crate_authors!())
            .about("hosts a function behind the Fn invoke protocol")
    ).get_matches();
    let config = Config::from_arg_matches(&matches, &cur_dir)?;
    Logger::switch_logging(&config)?;
    Server::new(config).with_handler(echo).run()
}

fn main() {
    match _main() {
        Ok(_) => exit(0),
        Err(ExitError::Generic) => exit(1),
    }
}
