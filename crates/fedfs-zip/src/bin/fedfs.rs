//! fedfs: Read and write files within (nested) ZIP archives.
//!
//! Paths may run through any number of archives, e.g. `work/app.zip/lib/b.jar/x.txt`.
//! Changes are committed to the archives when the command finishes.
//!
//! # Usage
//!
//! ```bash
//! echo hello | fedfs put work/app.zip/docs/hello.txt
//! fedfs ls work/app.zip/docs
//! fedfs cp work/app.zip/docs/hello.txt work/backup.zip/hello.txt
//! ```

use clap::{Parser, Subcommand};
use env_logger::Env;
use fedfs::{
    shutdown, AccessOptions, ArchiveDetector, DriverRegistry, EntryName, EntryType, FsConfig,
    FsController, FsError, FsManager, FsResult, MountPoint, Node, SyncOptions,
};
use fedfs_zip::{ZipDriver, ZipDriverConfig};
use log::{debug, error};
use serde::Deserialize;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::SystemTime;

/// Read and write files within nested ZIP archives.
#[derive(Parser, Debug)]
#[command(name = "fedfs")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Route entry I/O through the write-back cache
    #[arg(long, global = true)]
    cache: bool,

    /// TOML file with `[fs]` and `[zip]` settings
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the members of a directory
    Ls { path: PathBuf },
    /// Show the metadata of an entry
    Stat { path: PathBuf },
    /// Write the content of a file to stdout
    Cat { path: PathBuf },
    /// Write stdin (or a host file) to a file
    Put {
        path: PathBuf,
        /// Read from this host file instead of stdin
        #[arg(long, value_name = "FILE")]
        from: Option<PathBuf>,
    },
    /// Create a directory
    Mkdir {
        path: PathBuf,
        /// Create missing parents, and do not fail if the directory exists
        #[arg(short, long)]
        parents: bool,
    },
    /// Remove a file or an empty directory
    Rm { path: PathBuf },
    /// Copy a file
    Cp { source: PathBuf, target: PathBuf },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CliConfig {
    fs: FsConfig,
    zip: ZipDriverConfig,
}

impl CliConfig {
    fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        toml::from_str(&text).map_err(|e| e.to_string())
    }
}

/// Everything a command needs to address files.
struct Session {
    manager: FsManager,
    detector: ArchiveDetector,
    options: AccessOptions,
}

impl Session {
    fn new(config: CliConfig, cache: bool) -> Self {
        let mut registry = DriverRegistry::new(config.fs.clone());
        let mut detector = ArchiveDetector::new();
        ZipDriver::new(config.zip).install(&mut registry, &mut detector);
        Self {
            manager: FsManager::new(Arc::new(registry), config.fs),
            detector,
            options: if cache {
                AccessOptions::CACHE
            } else {
                AccessOptions::empty()
            },
        }
    }

    fn locate(&self, path: &Path) -> FsResult<(Arc<dyn FsController>, EntryName)> {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let (mount_point, name): (MountPoint, EntryName) = self.detector.resolve(&path)?;
        debug!("{} is {}", path.display(), mount_point.resolve(&name));
        Ok((self.manager.controller(&mount_point)?, name))
    }

    fn node(&self, path: &Path) -> FsResult<Node> {
        let (controller, name) = self.locate(path)?;
        controller
            .node(self.options, &name)?
            .ok_or_else(|| FsError::EntryNotFound(path.display().to_string()))
    }

    fn copy_into(&self, input: &mut dyn Read, path: &Path) -> FsResult<()> {
        let (controller, name) = self.locate(path)?;
        let mut output =
            controller.output(self.options | AccessOptions::CREATE_PARENTS, &name, None)?;
        io::copy(input, &mut output)?;
        output.finish()
    }

    fn run(&self, command: Command) -> FsResult<()> {
        match command {
            Command::Ls { path } => {
                let node = self.node(&path)?;
                if !node.is_directory() {
                    println!("{}", node.name.base_name());
                }
                for member in &node.members {
                    println!("{}", member);
                }
            }
            Command::Stat { path } => {
                let node = self.node(&path)?;
                let kind = match (node.is_file(), node.is_directory()) {
                    (true, true) => "file and directory",
                    (true, false) => "file",
                    _ => "directory",
                };
                println!("name: {}", path.display());
                println!("type: {}", kind);
                if let Some(size) = node.size() {
                    println!("size: {}", size);
                }
                if let Some(modified) = node.modified() {
                    println!("modified: {}", format_time(modified));
                }
            }
            Command::Cat { path } => {
                let (controller, name) = self.locate(&path)?;
                let mut input = controller.input(self.options, &name)?;
                let stdout = io::stdout();
                io::copy(&mut input, &mut stdout.lock())?;
            }
            Command::Put { path, from } => match from {
                Some(from) => self.copy_into(&mut File::open(from)?, &path)?,
                None => self.copy_into(&mut io::stdin().lock(), &path)?,
            },
            Command::Mkdir { path, parents } => {
                let (controller, name) = self.locate(&path)?;
                let options = if parents {
                    self.options | AccessOptions::CREATE_PARENTS
                } else {
                    self.options
                };
                match controller.make(options, &name, EntryType::Directory, None) {
                    Err(FsError::EntryExists(_)) if parents => {
                        if !self.node(&path)?.is_directory() {
                            return Err(FsError::NotADirectory(path.display().to_string()));
                        }
                    }
                    result => result?,
                }
            }
            Command::Rm { path } => {
                let (controller, name) = self.locate(&path)?;
                controller.unlink(self.options, &name)?;
            }
            Command::Cp { source, target } => {
                let (controller, name) = self.locate(&source)?;
                let mut input = controller.input(self.options, &name)?;
                self.copy_into(&mut input, &target)?;
            }
        }
        Ok(())
    }
}

fn format_time(time: SystemTime) -> String {
    chrono::DateTime::<chrono::Utc>::from(time).to_rfc3339()
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    let config = match &args.config {
        Some(path) => match CliConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load {}: {}", path.display(), e);
                process::exit(2);
            }
        },
        None => CliConfig::default(),
    };

    let session = Session::new(config, args.cache);
    let result = session.run(args.command);

    // commit whatever the command changed, even if it failed halfway
    let synced = session
        .manager
        .sync(SyncOptions::UMOUNT)
        .and_then(|()| shutdown::sync_all());

    let mut failed = false;
    if let Err(e) = result {
        error!("{}", e);
        failed = true;
    }
    if let Err(e) = synced {
        error!("Sync failed: {}", e);
        failed = !e.is_warning() || failed;
    }
    if failed {
        process::exit(1);
    }
}
