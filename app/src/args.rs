//! Command line arguments.
//!
//! Uses clap for CLI parsing with:
//! - Help text (`--help`)
//! - One flag per backend (`--vulkan`, `--dummy`)
//! - A warning instead of an error for unknown flags, so an unrecognized
//!   backend name falls back to the default backend

use std::ffi::OsString;

use clap::Parser;
use clap::error::{ContextKind, ContextValue, ErrorKind};
use redlilium_rhi::{BackendType, RhiConfig};

/// RedLilium RHI demo arguments.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(
    name = "redlilium-app",
    about = "Triangle demo for the RedLilium render hardware interface",
    long_about = "Opens a window and renders a triangle through the RedLilium RHI.\n\n\
        BACKEND SELECTION:\n\
        \n\
        • --vulkan: native Vulkan 1.3 via ash.\n\
        • --dummy: no GPU access; runs headless without a window.\n\
        \n\
        Without a backend flag the first backend that initializes is used.\n\
        \n\
        EXAMPLES:\n\
          # Run 120 frames on Vulkan with validation\n\
          ./redlilium-app --vulkan --validation --max-frames 120\n\
        \n\
          # Headless smoke test\n\
          ./redlilium-app --dummy --max-frames 10",
    version
)]
pub struct AppArgs {
    /// Use the native Vulkan backend.
    #[arg(long, conflicts_with = "dummy")]
    pub vulkan: bool,

    /// Use the dummy backend and run without a window.
    #[arg(long)]
    pub dummy: bool,

    /// Initial window width in pixels.
    #[arg(long, default_value = "1600")]
    pub width: u32,

    /// Initial window height in pixels.
    #[arg(long, default_value = "900")]
    pub height: u32,

    /// Exit after rendering N frames.
    #[arg(long)]
    pub max_frames: Option<u64>,

    /// Enable GPU validation layers.
    #[arg(long, conflicts_with = "no_validation")]
    pub validation: bool,

    /// Disable GPU validation layers.
    #[arg(long)]
    pub no_validation: bool,

    /// Disable vertical sync.
    #[arg(long)]
    pub no_vsync: bool,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Directory shader programs are read from.
    #[arg(long, default_value = "shaders")]
    pub shader_root: String,
}

impl AppArgs {
    /// Parse the process arguments.
    ///
    /// Exits with clap's message on malformed input.
    pub fn parse() -> Self {
        Self::parse_lenient(std::env::args_os())
    }

    /// Parse `args`, dropping unknown flags with a warning.
    pub fn parse_lenient<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let (args, ignored) = Self::try_parse_lenient(args).unwrap_or_else(|e| e.exit());
        for flag in ignored {
            log::warn!("Unknown flag '{flag}' ignored; using the default backend selection");
        }
        args
    }

    /// Parse `args`. Returns the parsed arguments and the unknown flags that were
    /// dropped.
    pub fn try_parse_lenient<I, T>(args: I) -> Result<(Self, Vec<String>), clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let mut args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        let mut ignored = Vec::new();
        loop {
            match Self::try_parse_from(&args) {
                Ok(parsed) => return Ok((parsed, ignored)),
                Err(e) if e.kind() == ErrorKind::UnknownArgument => {
                    let Some(ContextValue::String(flag)) = e.get(ContextKind::InvalidArg) else {
                        return Err(e);
                    };
                    // `--flag=value` is reported without the value.
                    let flag = flag.clone();
                    let before = args.len();
                    args.retain(|a| {
                        let a = a.to_string_lossy();
                        a != flag.as_str() && !a.starts_with(&format!("{flag}="))
                    });
                    if args.len() == before {
                        return Err(e);
                    }
                    ignored.push(flag);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Backend selected on the command line.
    pub fn backend(&self) -> BackendType {
        if self.vulkan {
            BackendType::Vulkan
        } else if self.dummy {
            BackendType::Dummy
        } else {
            BackendType::Auto
        }
    }

    /// Whether validation layers are requested.
    ///
    /// `--validation` forces them on, `--no-validation` off; debug builds enable
    /// them otherwise.
    pub fn validation(&self) -> bool {
        self.validation || (!self.no_validation && cfg!(debug_assertions))
    }

    /// Whether the demo runs without a window.
    pub fn headless(&self) -> bool {
        self.dummy
    }

    /// RHI configuration for these arguments.
    pub fn rhi_config(&self) -> RhiConfig {
        RhiConfig::new()
            .with_backend(self.backend())
            .with_validation(self.validation())
            .with_shader_root(&self.shader_root)
            .with_vsync(!self.no_vsync)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn parse(args: &[&str]) -> (AppArgs, Vec<String>) {
        let args = std::iter::once("redlilium-app").chain(args.iter().copied());
        AppArgs::try_parse_lenient(args).unwrap()
    }

    #[rstest]
    #[case::none(&[], BackendType::Auto)]
    #[case::vulkan(&["--vulkan"], BackendType::Vulkan)]
    #[case::dummy(&["--dummy"], BackendType::Dummy)]
    #[case::unknown(&["--metal"], BackendType::Auto)]
    fn test_backend_flag(#[case] args: &[&str], #[case] expected: BackendType) {
        assert_eq!(parse(args).0.backend(), expected);
    }

    #[test]
    fn test_defaults() {
        let (args, ignored) = parse(&[]);
        assert!(ignored.is_empty());
        assert_eq!((args.width, args.height), (1600, 900));
        assert_eq!(args.max_frames, None);
        assert_eq!(args.log_level, "info");
        assert!(!args.headless());
    }

    #[test]
    fn test_unknown_flags_are_reported() {
        let (args, ignored) = parse(&["--d3d12", "--dummy", "--max-frames", "3", "--gl"]);
        assert_eq!(ignored, vec!["--d3d12".to_string(), "--gl".to_string()]);
        assert_eq!(args.backend(), BackendType::Dummy);
        assert_eq!(args.max_frames, Some(3));
    }

    #[test]
    fn test_backends_conflict() {
        let args = ["redlilium-app", "--vulkan", "--dummy"];
        assert!(AppArgs::try_parse_lenient(args).is_err());
    }

    #[test]
    fn test_validation_flags() {
        assert!(parse(&["--validation"]).0.validation());
        assert!(!parse(&["--no-validation"]).0.validation());
    }

    #[test]
    fn test_rhi_config() {
        let config = parse(&["--dummy", "--no-vsync", "--shader-root", "assets"]).0.rhi_config();
        assert_eq!(config.backend, BackendType::Dummy);
        assert!(!config.vsync);
        assert_eq!(config.shader_root, std::path::PathBuf::from("assets"));
    }
}
