//! Configuration.
//!
//! This module primarily contains the type [`Config`] that holds all the
//! configuration used by fnhost. It can be loaded from a TOML formatted
//! config file, from command line options, and from the environment
//! variable the Fn platform uses to pass the listen socket to a function.
//!
//! [`Config`]: struct.Config.html

use std::{env, fmt, fs};
use std::convert::TryFrom;
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use clap::{App, Arg, ArgMatches};
use log::{LevelFilter, error};
use crate::error::Failed;


//------------ Defaults for Some Values --------------------------------------

/// The default socket address to listen on for invocations.
const DEFAULT_LISTEN_ADDR: SocketAddr = SocketAddr::new(
    IpAddr::V4(Ipv4Addr::LOCALHOST), 8888
);

/// The environment variable carrying the listen target.
const FN_LISTENER: &str = "FN_LISTENER";


//------------ Config --------------------------------------------------------

/// fnhost configuration.
///
/// This type contains the configuration of the server, that is, where to
/// listen for invocations, how many event loop threads to run them on, and
/// how to log.
///
/// All values are public and can be accessed directly.
///
/// The function [`config_args`] can be used to create the clap application.
/// Its matches can then be used to create the config via
/// [`from_arg_matches`]. Deployments that only rely on the environment
/// prepared by the platform can use [`from_env`] instead.
///
/// [`config_args`]: #method.config_args
/// [`from_arg_matches`]: #method.from_arg_matches
/// [`from_env`]: #method.from_env
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The address or socket path to listen on for invocations.
    pub listen: ListenTarget,

    /// The number of event loop threads serving connections.
    pub worker_threads: usize,

    /// The log levels to be logged.
    pub log_level: LevelFilter,

    /// The target to log to.
    pub log_target: LogTarget,
}

impl Config {
    /// Adds the basic arguments to a clap app.
    ///
    /// Returns the app with the arguments added.
    pub fn config_args<'a: 'b, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
        app
        .arg(Arg::with_name("config")
            .short("c")
            .long("config")
            .takes_value(true)
            .value_name("PATH")
            .help("Read base configuration from this file")
        )
        .arg(Arg::with_name("listen")
            .short("l")
            .long("listen")
            .takes_value(true)
            .value_name("ADDR")
            .help("Address or unix:PATH to listen on for invocations")
        )
        .arg(Arg::with_name("workers")
            .long("workers")
            .takes_value(true)
            .value_name("COUNT")
            .help("Number of event loop threads")
        )
        .arg(Arg::with_name("verbose")
            .short("v")
            .long("verbose")
            .multiple(true)
            .help("Log more information, twice for even more")
        )
        .arg(Arg::with_name("quiet")
            .short("q")
            .long("quiet")
            .multiple(true)
            .conflicts_with("verbose")
            .help("Log less information, twice for no information")
        )
        .arg(Arg::with_name("logfile")
            .long("logfile")
            .takes_value(true)
            .value_name("PATH")
            .help("Log to this file")
        )
    }

    /// Creates a configuration from command line matches.
    ///
    /// The function attempts to create a configuration from the command
    /// line arguments provided via `matches`. It will try to read a config
    /// file if provided via the config file option (`-c` or `--config`),
    /// apply the `FN_LISTENER` environment variable, and finally apply all
    /// the command line options.
    ///
    /// All relative paths given in command line arguments will be
    /// interpreted relative to `cur_dir`. The function prints matching
    /// error messages and returns [`Failed`] if any of the sources could
    /// not be processed.
    pub fn from_arg_matches(
        matches: &ArgMatches,
        cur_dir: &Path,
    ) -> Result<Self, Failed> {
        let mut res = Self::create_base_config(
            Self::path_value_of(matches, "config", cur_dir)
                .as_ref().map(AsRef::as_ref)
        )?;
        res.apply_env()?;
        res.apply_arg_matches(matches, cur_dir)?;
        Ok(res)
    }

    /// Creates a configuration from the environment alone.
    ///
    /// This is the path taken by functions deployed on the platform: all
    /// values start out at their defaults and the `FN_LISTENER` environment
    /// variable, if present, provides the listen target.
    pub fn from_env() -> Result<Self, Failed> {
        let mut res = Self::default();
        res.apply_env()?;
        Ok(res)
    }

    /// Creates the correct base configuration for the given config file.
    fn create_base_config(path: Option<&Path>) -> Result<Self, Failed> {
        let file = match path {
            Some(path) => {
                match ConfigFile::read(path)? {
                    Some(file) => file,
                    None => {
                        error!("Cannot read config file {}", path.display());
                        return Err(Failed)
                    }
                }
            }
            None => return Ok(Self::default()),
        };
        Self::from_config_file(file)
    }

    /// Creates a base configuration from a config file.
    fn from_config_file(mut file: ConfigFile) -> Result<Self, Failed> {
        let log_target = Self::log_target_from_config_file(&mut file)?;
        let res = Config {
            listen: file.take_from_str("listen")?.unwrap_or_default(),
            worker_threads: match file.take_usize("workers")? {
                Some(0) => {
                    error!(
                        "Failed in config file {}: \
                         'workers' must not be zero.",
                        file.path.display()
                    );
                    return Err(Failed)
                }
                Some(value) => value,
                None => num_cpus::get(),
            },
            log_level: file.take_from_str("log-level")?.unwrap_or(
                LevelFilter::Warn
            ),
            log_target,
        };
        file.check_exhausted()?;
        Ok(res)
    }

    /// Determines the logging target from the config file.
    fn log_target_from_config_file(
        file: &mut ConfigFile
    ) -> Result<LogTarget, Failed> {
        let target = file.take_string("log")?;
        let log_file = file.take_path("log-file")?;
        match target.as_ref().map(AsRef::as_ref) {
            Some("stderr") | None => Ok(LogTarget::Stderr),
            Some("file") => {
                match log_file {
                    Some(file) => Ok(LogTarget::File(file)),
                    None => {
                        error!(
                            "Failed in config file {}: \
                             'log-file' is required for log target 'file'.",
                            file.path.display()
                        );
                        Err(Failed)
                    }
                }
            }
            Some(value) => {
                error!(
                    "Failed in config file {}: invalid log target '{}'.",
                    file.path.display(), value
                );
                Err(Failed)
            }
        }
    }

    /// Applies the `FN_LISTENER` environment variable.
    ///
    /// The platform hands the listen socket to a function through this
    /// variable, either as a `unix:` prefixed socket path or as a bare
    /// socket address.
    fn apply_env(&mut self) -> Result<(), Failed> {
        match env::var(FN_LISTENER) {
            Ok(value) => {
                self.listen = match ListenTarget::from_str(&value) {
                    Ok(target) => target,
                    Err(err) => {
                        error!("Invalid value for {}: {}.", FN_LISTENER, err);
                        return Err(Failed)
                    }
                };
            }
            Err(env::VarError::NotPresent) => {}
            Err(env::VarError::NotUnicode(_)) => {
                error!("Invalid value for {}: not valid Unicode.", FN_LISTENER);
                return Err(Failed)
            }
        }
        Ok(())
    }

    /// Applies the basic command line arguments to the configuration.
    fn apply_arg_matches(
        &mut self,
        matches: &ArgMatches,
        cur_dir: &Path,
    ) -> Result<(), Failed> {
        // listen
        if let Some(value) = matches.value_of("listen") {
            self.listen = match ListenTarget::from_str(value) {
                Ok(target) => target,
                Err(err) => {
                    error!("Invalid value for listen: {}.", err);
                    return Err(Failed)
                }
            };
        }

        // workers
        if let Some(value) = matches.value_of("workers") {
            self.worker_threads = match value.parse() {
                Ok(0) | Err(_) => {
                    error!("Invalid value for workers: {}.", value);
                    return Err(Failed)
                }
                Ok(value) => value,
            };
        }

        // logfile
        self.apply_log_matches(matches, cur_dir);

        // verbose, quiet
        match (
            matches.occurrences_of("verbose"),
            matches.occurrences_of("quiet")
        ) {
            // This should never happen, but you never know.
            (_, 1) => self.log_level = LevelFilter::Error,
            (_, x) if x > 1 => self.log_level = LevelFilter::Off,
            (0, _) => { }
            (1, _) => self.log_level = LevelFilter::Info,
            (_, _) => self.log_level = LevelFilter::Debug,
        }

        Ok(())
    }

    /// Applies the logging target command line arguments.
    fn apply_log_matches(&mut self, matches: &ArgMatches, cur_dir: &Path) {
        if let Some(file) = matches.value_of("logfile") {
            if file == "-" {
                self.log_target = LogTarget::Stderr
            }
            else {
                self.log_target = LogTarget::File(cur_dir.join(file))
            }
        }
    }

    /// Returns a path value in arg matches.
    ///
    /// This expands a relative path based on the given directory.
    fn path_value_of(
        matches: &ArgMatches,
        key: &str,
        dir: &Path
    ) -> Option<PathBuf> {
        matches.value_of(key).map(|path| dir.join(path))
    }
}


//--- Default

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: ListenTarget::default(),
            worker_threads: num_cpus::get(),
            log_level: LevelFilter::Warn,
            log_target: LogTarget::Stderr,
        }
    }
}


//------------ ListenTarget --------------------------------------------------

/// Where the server should listen for invocations.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ListenTarget {
    /// Listen on a TCP socket address.
    Addr(SocketAddr),

    /// Listen on a Unix domain socket at the given path.
    Unix(PathBuf),
}


//--- Default

impl Default for ListenTarget {
    fn default() -> Self {
        ListenTarget::Addr(DEFAULT_LISTEN_ADDR)
    }
}


//--- FromStr

impl FromStr for ListenTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(format!("missing socket path in '{}'", s))
            }
            Ok(ListenTarget::Unix(path.into()))
        }
        else {
            SocketAddr::from_str(s).map(ListenTarget::Addr).map_err(|_| {
                format!("invalid listen address '{}'", s)
            })
        }
    }
}


//--- Display

impl fmt::Display for ListenTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ListenTarget::Addr(ref addr) => addr.fmt(f),
            ListenTarget::Unix(ref path) => {
                write!(f, "unix:{}", path.display())
            }
        }
    }
}


//------------ LogTarget -----------------------------------------------------

/// The target to log to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LogTarget {
    /// Errors on stderr.
    Stderr,

    /// A file.
    File(PathBuf),
}


//------------ ConfigFile ----------------------------------------------------

/// The content of a config file.
///
/// This is a thin wrapper around `toml::Table` to make dealing with it more
/// convenient.
struct ConfigFile {
    /// The content of the file.
    content: toml::value::Table,

    /// The path to the config file.
    path: PathBuf,

    /// The directory we found the file in.
    ///
    /// This is used in relative paths.
    dir: PathBuf,
}

impl ConfigFile {
    /// Reads the config file at the given path.
    ///
    /// If there is no such file, returns `None`. If there is a file but it
    /// is broken, aborts.
    fn read(path: &Path) -> Result<Option<Self>, Failed> {
        let mut file = match fs::File::open(path) {
            Ok(file) => file,
            Err(_) => return Ok(None)
        };
        let mut config = String::new();
        if let Err(err) = file.read_to_string(&mut config) {
            error!(
                "Failed to read config file {}: {}",
                path.display(), err
            );
            return Err(Failed);
        }
        Self::parse(&config, path).map(Some)
    }

    /// Parses the content of the file from a string.
    fn parse(content: &str, path: &Path) -> Result<Self, Failed> {
        let content = match toml::from_str(content) {
            Ok(toml::Value::Table(content)) => content,
            Ok(_) => {
                error!(
                    "Failed to parse config file {}: Not a mapping.",
                    path.display()
                );
                return Err(Failed);
            }
            Err(err) => {
                error!(
                    "Failed to parse config file {}: {}",
                    path.display(), err
                );
                return Err(Failed);
            }
        };
        let dir = if path.is_relative() {
            let cur_dir = match env::current_dir() {
                Ok(dir) => dir,
                Err(err) => {
                    error!(
                        "Fatal: Can't determine current directory: {}.",
                        err
                    );
                    return Err(Failed);
                }
            };
            cur_dir.join(path).parent().unwrap().into() // a file always has a parent
        }
        else {
            path.parent().unwrap().into() // a file always has a parent
        };
        Ok(ConfigFile {
            content,
            path: path.into(),
            dir
        })
    }

    /// Takes an unsigned integer value from the config file.
    ///
    /// The value is taken from the given `key`. Returns `Ok(None)` if there
    /// is no such key. Returns an error if the key exists but the value
    /// isn’t an integer or if it is negative.
    fn take_usize(&mut self, key: &str) -> Result<Option<usize>, Failed> {
        match self.content.remove(key) {
            Some(toml::Value::Integer(value)) => {
                usize::try_from(value).map(Some).map_err(|_| {
                    error!(
                        "Failed in config file {}: \
                         '{}' expected to be a positive integer.",
                        self.path.display(), key
                    );
                    Failed
                })
            }
            Some(_) => {
                error!(
                    "Failed in config file {}: \
                     '{}' expected to be an integer.",
                    self.path.display(), key
                );
                Err(Failed)
            }
            None => Ok(None)
        }
    }

    /// Takes a string value from the config file.
    ///
    /// The value is taken from the given `key`. Returns `Ok(None)` if there
    /// is no such key. Returns an error if the key exists but the value
    /// isn’t a string.
    fn take_string(&mut self, key: &str) -> Result<Option<String>, Failed> {
        match self.content.remove(key) {
            Some(toml::Value::String(value)) => Ok(Some(value)),
            Some(_) => {
                error!(
                    "Failed in config file {}: \
                     '{}' expected to be a string.",
                    self.path.display(), key
                );
                Err(Failed)
            }
            None => Ok(None)
        }
    }

    /// Takes a string encoded value from the config file.
    ///
    /// The value is taken from the given `key`. It is expected to be a
    /// string and will be converted to the final type via
    /// `FromStr::from_str`.
    fn take_from_str<T>(&mut self, key: &str) -> Result<Option<T>, Failed>
    where T: FromStr, T::Err: fmt::Display {
        match self.take_string(key)? {
            Some(value) => {
                match T::from_str(&value) {
                    Ok(value) => Ok(Some(value)),
                    Err(err) => {
                        error!(
                            "Failed in config file {}: \
                             illegal value in '{}': {}.",
                            self.path.display(), key, err
                        );
                        Err(Failed)
                    }
                }
            }
            None => Ok(None)
        }
    }

    /// Takes a path value from the config file.
    ///
    /// A relative path is interpreted relative to the directory the config
    /// file lives in.
    fn take_path(&mut self, key: &str) -> Result<Option<PathBuf>, Failed> {
        self.take_string(key).map(|opt| opt.map(|path| self.dir.join(path)))
    }

    /// Checks whether the config file is now empty.
    ///
    /// If it isn’t, logs a message containing the stray keys and returns
    /// an error.
    fn check_exhausted(&self) -> Result<(), Failed> {
        if !self.content.is_empty() {
            let keys: Vec<_> = self.content.keys().map(
                String::as_str
            ).collect();
            error!(
                "Failed in config file {}: Unknown settings {}.",
                self.path.display(), keys.join(", ")
            );
            Err(Failed)
        }
        else {
            Ok(())
        }
    }
}


//============ Tests =========================================================
