//! Machine configuration.
use std::fmt;

/// Parameters of the simulated machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    /// Number of physical frames.
    pub num_phys_pages: usize,
    /// Ticks between two timer interrupts.
    pub timer_period: u64,
    /// Debug flag characters, see [`set_debug_flags`](crate::kprint::set_debug_flags).
    pub debug_flags: String,
    /// Silences `info!` and `warning!`.
    pub quiet: bool,
    /// Mirrors console output to the host's standard output.
    pub echo_console: bool,
    /// Executable run as the first process.
    pub shell_program: String,
    /// Arguments passed to the shell program.
    pub shell_args: Vec<String>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            num_phys_pages: 64,
            timer_period: 500,
            debug_flags: String::new(),
            quiet: false,
            echo_console: false,
            shell_program: "sh.coff".into(),
            shell_args: Vec::new(),
        }
    }
}

/// Malformed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A flag that takes a value was last on the line.
    MissingValue(&'static str),
    /// A numeric flag got something else.
    BadNumber(String),
    UnknownFlag(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingValue(flag) => write!(f, "{} expects a value", flag),
            ConfigError::BadNumber(v) => write!(f, "{:?} is not a number", v),
            ConfigError::UnknownFlag(flag) => write!(f, "unknown flag {}", flag),
        }
    }
}

impl std::error::Error for ConfigError {}

impl MachineConfig {
    /// Parses a command line (without the program name).
    ///
    /// | Flag | Meaning |
    /// |------|---------|
    /// | `-m pages` | number of physical pages |
    /// | `-t ticks` | timer period |
    /// | `-d flags` | debug flags |
    /// | `-q` | quiet |
    /// | `-e` | echo the console to standard output |
    /// | `-x program [args..]` | shell program; the rest of the line are its arguments |
    pub fn from_args<I, S>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        fn number<T: std::str::FromStr>(v: Option<String>, flag: &'static str) -> Result<T, ConfigError> {
            let v = v.ok_or(ConfigError::MissingValue(flag))?;
            v.parse().map_err(|_| ConfigError::BadNumber(v))
        }

        let mut config = Self::default();
        let mut args = args.into_iter().map(Into::into);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-m" => config.num_phys_pages = number(args.next(), "-m")?,
                "-t" => config.timer_period = number(args.next(), "-t")?,
                "-d" => config.debug_flags = args.next().ok_or(ConfigError::MissingValue("-d"))?,
                "-q" => config.quiet = true,
                "-e" => config.echo_console = true,
                "-x" => {
                    config.shell_program = args.next().ok_or(ConfigError::MissingValue("-x"))?;
                    config.shell_args = args.by_ref().collect();
                }
                _ => return Err(ConfigError::UnknownFlag(arg)),
            }
        }
        Ok(config)
    }
}
