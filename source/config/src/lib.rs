//! # Real-time core board configuration
//!
//! Board configuration is written in TOML, checked and rendered to
//! [`postcard`] at build time, and decoded again at runtime, so the
//! application itself never has to parse TOML.
//!
//! ## In a `build.rs` script
//!
//! The application crate should include this library as a build dependency:
//!
//! ```toml
//! [build-dependencies]
//! rtcore-config = { path = "../../source/config", features = ["use-std"] }
//! ```
//!
//! And call [`buildtime::render_file`] to render a single board file:
//!
//! ```rust,ignore
//! # #![allow(clippy::needless_doctest_main, non_camel_case_types)]
//! # #[derive(serde::Serialize, serde::Deserialize)]
//! # struct YOUR_PLATFORM_TYPE(u8);
//! use rtcore_config::buildtime::render_file;
//! fn main() {
//!     render_file::<YOUR_PLATFORM_TYPE>("boards/mt3620-rdb.toml").unwrap();
//! }
//! ```
//!
//! or [`buildtime::render_all`] to render every board file in a directory.
//!
//! ## In the application
//!
//! Include this crate *again* as a normal dependency, and load the rendered
//! configuration with [`include_config!`]:
//!
//! ```rust,ignore
//! # #![allow(non_camel_case_types)]
//! # #[derive(serde::Serialize, serde::Deserialize)]
//! # struct YOUR_PLATFORM_TYPE(u8);
//! #[link_section = ".sysram"]
//! static SPIM: spim::Registry = unsafe { spim::Registry::mt3620() };
//!
//! let config = rtcore_config::include_config!(YOUR_PLATFORM_TYPE).unwrap();
//! for settings in &config.spim {
//!     let spi = SPIM.open_with(settings)?;
//!     // ...
//! }
//! ```
//!
//! Board files list the ISUs to open as SPI masters under `[[spim]]`; every
//! field but `unit` is optional (see [`SpimSettings`]). Application-specific
//! settings go under `[platform]`.

#![cfg_attr(not(any(feature = "use-std", test)), no_std)]

use core::fmt;

use mt3620::Unit;
use serde::{Deserialize, Serialize};
use spim::SpimSettings;

/// The top level configuration type.
///
/// This type is generic over the application-specific configuration type.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RtcoreConfig<Platform> {
    /// ISUs to open as SPI masters.
    #[serde(default)]
    pub spim: heapless::Vec<SpimSettings, { Unit::ISU_COUNT }>,
    pub platform: Platform,
}

/// A board configuration that parsed, but doesn't describe a usable board.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// A `[[spim]]` entry names a unit that is not an ISU.
    NotAnIsu(Unit),
    /// Two `[[spim]]` entries name the same unit.
    DuplicateUnit(Unit),
    /// A `[[spim]]` entry's `irq_priority` is not a priority the NVIC
    /// implements.
    IrqPriority { unit: Unit, priority: u8 },
}

pub const CONFIG_DIR_VAR: &str = "RTCORE_CONFIG_DIR";
pub const CONFIG_FILE_VAR: &str = "RTCORE_CONFIG";

// === impl RtcoreConfig ===

impl<Platform> RtcoreConfig<Platform> {
    /// Returns the SPI master settings for `unit`, if the board opens it.
    #[must_use]
    pub fn spim(&self, unit: Unit) -> Option<&SpimSettings> {
        self.spim.iter().find(|settings| settings.unit == unit)
    }

    /// Checks that every `[[spim]]` entry names a distinct ISU, with an
    /// interrupt priority the NVIC implements.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, settings) in self.spim.iter().enumerate() {
            let unit = settings.unit;
            if unit.isu_index().is_none() {
                return Err(ConfigError::NotAnIsu(unit));
            }
            if self.spim[..i].iter().any(|earlier| earlier.unit == unit) {
                return Err(ConfigError::DuplicateUnit(unit));
            }
            if settings.irq_priority > SpimSettings::IRQ_PRIORITY_MAX {
                return Err(ConfigError::IrqPriority {
                    unit,
                    priority: settings.irq_priority,
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NotAnIsu(unit) => {
                write!(f, "{unit:?} is not an ISU, and cannot be opened as a SPI master")
            }
            ConfigError::DuplicateUnit(unit) => {
                write!(f, "{unit:?} is configured as a SPI master more than once")
            }
            ConfigError::IrqPriority { unit, priority } => write!(
                f,
                "{unit:?} has IRQ priority {priority}, but priorities only go up to {}",
                SpimSettings::IRQ_PRIORITY_MAX
            ),
        }
    }
}

/// Tools intended for use in build.rs scripts
#[cfg(feature = "use-std")]
pub mod buildtime {
    const OUT_DIR: &str = "OUT_DIR";
    const TAG: &str = concat!(module_path!(), ":");

    use std::{env, fs, path::Path};

    use super::*;
    use miette::{Context, IntoDiagnostic, Result};
    use serde::de::DeserializeOwned;

    pub(crate) fn from_toml<Platform>(s: &str) -> Result<RtcoreConfig<Platform>>
    where
        Platform: DeserializeOwned + 'static,
    {
        let config: RtcoreConfig<Platform> = toml::from_str(s).into_diagnostic()?;
        config
            .validate()
            .map_err(|error| miette::miette!("{}", error))
            .wrap_err("Invalid [[spim]] configuration")?;
        Ok(config)
    }

    pub(crate) fn to_postcard<Platform>(config: &RtcoreConfig<Platform>) -> Result<Vec<u8>>
    where
        Platform: Serialize,
    {
        postcard::to_stdvec(config).into_diagnostic()
    }

    /// Render all configuration files in the given directory.
    ///
    /// The resulting configs are stored in the cargo `OUT_DIR`, and may be
    /// referenced by name in the application when using
    /// [`include_config!()`].
    pub fn render_all<Platform>(config_dir: impl AsRef<Path>) -> Result<()>
    where
        Platform: Serialize + DeserializeOwned + 'static,
    {
        let config_dir = config_dir.as_ref();
        let config_dir_disp = config_dir.display();
        let out_dir = env::var(OUT_DIR)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read '{OUT_DIR}' env variable"))?;

        println!("cargo:rerun-if-changed={config_dir_disp}");
        println!("cargo:rustc-env={CONFIG_DIR_VAR}={out_dir}");
        eprintln!("{TAG} {OUT_DIR}={out_dir}");

        let entries = fs::read_dir(config_dir)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read config file directory '{config_dir_disp}'"))?;

        let mut rendered = 0;
        let mut skipped = 0;
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    println!("cargo:warning=Error reading config dir entry: {e}");
                    continue;
                }
            };

            let path = entry.path();
            let is_toml = path.extension().is_some_and(|ext| ext == "toml");
            if !path.is_file() || !is_toml {
                eprintln!("{TAG} '{}' is not a TOML file; skipping", path.display());
                skipped += 1;
                continue;
            }

            render_file_to::<Platform>(&path, &out_dir)?;
            rendered += 1;
        }

        if rendered == 0 {
            return Err(miette::MietteDiagnostic::new("No config files were rendered!")
                .with_help(format!(
                    "config directory '{config_dir_disp}' contained {skipped} other entries"
                ))
                .into());
        }

        Ok(())
    }

    /// Load a configuration file from the given path, will be made available
    /// to the application when it calls [`include_config!()`].
    pub fn render_file<Platform>(path: impl AsRef<Path>) -> Result<()>
    where
        Platform: Serialize + DeserializeOwned + 'static,
    {
        let out_dir = env::var(OUT_DIR)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read '{OUT_DIR}' env variable"))?;
        eprintln!("{TAG} {OUT_DIR}='{out_dir}'");
        render_file_to::<Platform>(path, out_dir)
    }

    fn render_file_to<Platform>(path: impl AsRef<Path>, out: impl AsRef<Path>) -> Result<()>
    where
        Platform: Serialize + DeserializeOwned + 'static,
    {
        let path = path.as_ref();
        let path_disp = path.display();

        (|| {
            let filename = path
                .file_name()
                .ok_or_else(|| miette::miette!("Path has no filename!"))?;
            eprintln!("{TAG} rendering config file '{path_disp}'");
            let toml = fs::read_to_string(path).into_diagnostic()?;
            let config: RtcoreConfig<Platform> = from_toml(&toml)?;

            let mut out = out.as_ref().join(filename);
            out.set_extension("postcard");
            fs::write(&out, to_postcard(&config)?).into_diagnostic()?;
            println!("cargo:rustc-env={CONFIG_FILE_VAR}={}", out.display());
            println!("cargo:rerun-if-changed={path_disp}");

            Ok::<_, miette::Report>(())
        })()
        .wrap_err_with(|| format!("Failed to render config file '{path_disp}'"))
    }

    #[cfg(test)]
    mod tests {
        use std::path::PathBuf;

        use super::*;

        #[derive(Debug, Eq, PartialEq, Serialize, serde::Deserialize)]
        struct Rdb {
            status_led: u32,
        }

        const BOARDS: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/boards");

        const DUPLICATE: &str = r#"
            [[spim]]
            unit = "Isu1"
            [[spim]]
            unit = "Isu1"
            [platform]
            status_led = 1
        "#;

        fn scratch_dir(name: &str) -> PathBuf {
            let dir = env::temp_dir().join(format!("rtcore-config-{}-{name}", std::process::id()));
            fs::create_dir_all(&dir).unwrap();
            dir
        }

        fn has_message(report: &miette::Report, message: &str) -> bool {
            report.chain().any(|error| error.to_string() == message)
        }

        #[test]
        fn renders_board_files() {
            let out = scratch_dir("out");
            // only this test reads `OUT_DIR`.
            env::set_var(OUT_DIR, &out);

            render_file::<Rdb>(format!("{BOARDS}/mt3620-rdb.toml")).unwrap();
            let bytes = fs::read(out.join("mt3620-rdb.postcard")).unwrap();
            let config = crate::runtime::from_postcard::<Rdb>(&bytes).unwrap();
            assert_eq!(config.platform, Rdb { status_led: 8 });
            assert_eq!(config.spim.len(), 2);

            fs::remove_file(out.join("mt3620-rdb.postcard")).unwrap();
            render_all::<Rdb>(BOARDS).unwrap();
            assert!(out.join("mt3620-rdb.postcard").is_file());

            fs::remove_dir_all(out).unwrap();
        }

        #[test]
        fn duplicate_units_are_a_diagnostic() {
            let report = from_toml::<Rdb>(DUPLICATE).unwrap_err();
            assert!(has_message(&report, "Invalid [[spim]] configuration"));
            assert!(has_message(
                &report,
                &ConfigError::DuplicateUnit(Unit::Isu1).to_string()
            ));

            let dir = scratch_dir("dup");
            let board = dir.join("dup.toml");
            fs::write(&board, DUPLICATE).unwrap();
            let report = render_file_to::<Rdb>(&board, &dir).unwrap_err();
            assert!(has_message(
                &report,
                &format!("Failed to render config file '{}'", board.display())
            ));
            assert!(has_message(&report, "Invalid [[spim]] configuration"));
            assert!(!dir.join("dup.postcard").exists());

            fs::remove_dir_all(dir).unwrap();
        }
    }
}

/// Tools intended for use at runtime
pub mod runtime {
    use crate::{ConfigError, RtcoreConfig};
    use serde::de::DeserializeOwned;

    #[derive(Debug, PartialEq)]
    pub enum Error {
        Postcard(postcard::Error),
        Invalid(ConfigError),
    }

    pub fn from_postcard<Platform>(s: &[u8]) -> Result<RtcoreConfig<Platform>, Error>
    where
        Platform: DeserializeOwned + 'static,
    {
        let config: RtcoreConfig<Platform> = postcard::from_bytes(s).map_err(Error::Postcard)?;
        config.validate().map_err(Error::Invalid)?;
        Ok(config)
    }
}

/// Load the configuration rendered by [`buildtime`] in a build.rs.
///
/// Should be called with the type of your platform specific type
#[macro_export]
macro_rules! include_config {
    ($platform: ty, $name: literal) => {{
        const RTCORE_CONFIG: &[u8] =
            include_bytes!(concat!(env!("RTCORE_CONFIG_DIR"), "/", $name, ".postcard"));
        $crate::runtime::from_postcard::<$platform>(RTCORE_CONFIG)
    }};
    ($platform: ty) => {{
        const RTCORE_CONFIG: &[u8] = include_bytes!(env!("RTCORE_CONFIG"));
        $crate::runtime::from_postcard::<$platform>(RTCORE_CONFIG)
    }};
}
