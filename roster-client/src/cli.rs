//! Command-line flags for the `roster` binary.

/// What the binary does after building its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Read through the cache tiers, fetching on a miss. `force_refresh`
    /// goes straight to the network unless throttled.
    Fetch { force_refresh: bool },
    /// Read the cache tiers only.
    Cached,
    /// Clear every tier.
    Clear,
}

impl Command {
    /// Parse flags, ignoring `--config <path>`. `--clear` beats `--cached`,
    /// which beats `--refresh`.
    pub fn from_args(args: impl IntoIterator<Item = String>) -> Self {
        let mut force_refresh = false;
        let mut cached = false;
        let mut clear = false;

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    args.next();
                }
                "--refresh" => force_refresh = true,
                "--cached" => cached = true,
                "--clear" => clear = true,
                _ => {}
            }
        }

        if clear {
            Self::Clear
        } else if cached {
            Self::Cached
        } else {
            Self::Fetch { force_refresh }
        }
    }
}
