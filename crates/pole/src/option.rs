use std::env;
use std::ffi::OsStr;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

const POLE_CONFIG_FILE_PATH: &str = "POLE_CONFIG_FILE_PATH";
const POLE_INDEX_URI: &str = "POLE_INDEX_URI";
const POLE_HTTP_ADDR: &str = "POLE_HTTP_ADDR";
const POLE_GRPC_ADDR: &str = "POLE_GRPC_ADDR";
const POLE_DATA_PATH: &str = "POLE_DATA_PATH";
const POLE_WEB_PATH: &str = "POLE_WEB_PATH";
const POLE_LOG_LEVEL: &str = "POLE_LOG_LEVEL";
const POLE_JOIN: &str = "POLE_JOIN";
const POLE_RAFT_ID: &str = "POLE_RAFT_ID";
const POLE_RAFT_ADDR: &str = "POLE_RAFT_ADDR";
const POLE_RAFT_DATA_DIR: &str = "POLE_RAFT_DATA_DIR";
const POLE_RAFT_BOOTSTRAP: &str = "POLE_RAFT_BOOTSTRAP";

const DEFAULT_CONFIG_FILE_PATH: &str = "./pole.toml";
const DEFAULT_ENV_FILE: &str = ".env";
const DEFAULT_INDEX_URI: &str = "file:///tmp/pole";
const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_GRPC_ADDR: &str = "0.0.0.0:5001";
const DEFAULT_DATA_PATH: &str = "./";
const DEFAULT_WEB_PATH: &str = "./web/dist/spa";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_RAFT_ID: &str = "node1";
const DEFAULT_RAFT_ADDR: &str = "127.0.0.1:5002";
const DEFAULT_RAFT_DATA_DIR: &str = "./raft";

/// Daemon configuration, merged from (lowest to highest precedence) the
/// TOML config file, `POLE_*` environment variables, and CLI flags.
#[derive(Debug, Clone, Parser, Deserialize)]
#[clap(version, next_display_order = None)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct Opt {
    /// URI of the shared segment store: `file://<path>` or
    /// `oss://<bucket>/<prefix>?endpoint=…`.
    #[clap(long, env = POLE_INDEX_URI, default_value_t = default_index_uri())]
    #[serde(default = "default_index_uri")]
    pub index_uri: String,

    /// Address the HTTP front door binds to.
    #[clap(long, env = POLE_HTTP_ADDR, default_value_t = default_http_addr())]
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// Address of the binary RPC listener; followers forward mutating
    /// statements here, so it must be reachable by peers.
    #[clap(long, env = POLE_GRPC_ADDR, default_value_t = default_grpc_addr())]
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: String,

    /// Scratch space of this node.
    #[clap(long, env = POLE_DATA_PATH, default_value_os_t = default_data_path())]
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// Root of the admin dashboard assets.
    #[clap(long, env = POLE_WEB_PATH, default_value_os_t = default_web_path())]
    #[serde(default = "default_web_path")]
    pub web_path: PathBuf,

    /// One of `off`, `error`, `warn`, `info`, `debug`, `trace`.
    #[clap(long, env = POLE_LOG_LEVEL, default_value_t = default_log_level())]
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// RPC address of any cluster member to join at startup.
    #[clap(long, env = POLE_JOIN)]
    #[serde(default)]
    pub join: Option<String>,

    #[clap(flatten)]
    #[serde(default)]
    pub raft: RaftOpt,

    /// Path of a dotenv file loaded before anything else.
    #[clap(long = "env")]
    #[serde(skip)]
    pub env_file: Option<PathBuf>,

    /// Path of the TOML configuration file.
    #[clap(long = "config", env = POLE_CONFIG_FILE_PATH)]
    pub config_file_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Parser, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct RaftOpt {
    /// Unique identifier of this node in the cluster.
    #[clap(long = "raft-id", env = POLE_RAFT_ID, default_value_t = default_raft_id())]
    #[serde(default = "default_raft_id")]
    pub id: String,

    /// Address the consensus transport binds to.
    #[clap(long = "raft-addr", env = POLE_RAFT_ADDR, default_value_t = default_raft_addr())]
    #[serde(default = "default_raft_addr")]
    pub address: String,

    /// Directory holding the consensus log, vote, and snapshots
    /// (per node id).
    #[clap(long = "raft-data-dir", env = POLE_RAFT_DATA_DIR, default_value_os_t = default_raft_data_dir())]
    #[serde(default = "default_raft_data_dir")]
    pub data_dir: PathBuf,

    /// Seed a brand-new single-node cluster. A no-op once state exists.
    #[clap(long = "raft-bootstrap", env = POLE_RAFT_BOOTSTRAP)]
    #[serde(default)]
    pub bootstrap: bool,
}

impl Default for RaftOpt {
    fn default() -> Self {
        RaftOpt {
            id: default_raft_id(),
            address: default_raft_addr(),
            data_dir: default_raft_data_dir(),
            bootstrap: false,
        }
    }
}

impl Opt {
    /// Build the configuration from the dotenv file, the config file, the
    /// environment, and the CLI, in ascending precedence. Returns the
    /// config file path actually read, if any.
    pub fn try_build() -> anyhow::Result<(Opt, Option<PathBuf>)> {
        let mut opts = Opt::parse();

        match &opts.env_file {
            Some(path) => {
                dotenvy::from_path(path).map_err(|err| {
                    anyhow::anyhow!("unable to load the {path:?} environment file: {err}")
                })?;
            }
            None => {
                let _ = dotenvy::from_path(DEFAULT_ENV_FILE);
            }
        }
        // pick up anything the dotenv file injected
        opts = Opt::parse();

        let mut config_read_from = None;
        let user_specified_config_file_path = opts.config_file_path.clone();
        let config_file_path = user_specified_config_file_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE_PATH));

        match std::fs::read_to_string(&config_file_path) {
            Ok(config) => {
                let opt_from_config = toml::from_str::<Opt>(&config)?;
                if opt_from_config.config_file_path.is_some() {
                    anyhow::bail!("`config_file_path` is not supported in the configuration file")
                }
                // config values land in the env so that env vars and CLI
                // args keep their precedence on the next parse
                opt_from_config.export_to_env();
                opts = Opt::parse();
                config_read_from = Some(config_file_path);
            }
            Err(err) => {
                if let Some(path) = user_specified_config_file_path {
                    anyhow::bail!(
                        "unable to open or read the {:?} configuration file: {}.",
                        path,
                        err,
                    )
                }
            }
        }

        Ok((opts, config_read_from))
    }

    /// Export the values to their env vars where those are not set.
    fn export_to_env(self) {
        let Opt {
            index_uri,
            http_addr,
            grpc_addr,
            data_path,
            web_path,
            log_level,
            join,
            raft,
            env_file: _,
            config_file_path: _,
        } = self;
        export_to_env_if_not_present(POLE_INDEX_URI, index_uri);
        export_to_env_if_not_present(POLE_HTTP_ADDR, http_addr);
        export_to_env_if_not_present(POLE_GRPC_ADDR, grpc_addr);
        export_to_env_if_not_present(POLE_DATA_PATH, data_path);
        export_to_env_if_not_present(POLE_WEB_PATH, web_path);
        export_to_env_if_not_present(POLE_LOG_LEVEL, log_level);
        if let Some(join) = join {
            export_to_env_if_not_present(POLE_JOIN, join);
        }
        export_to_env_if_not_present(POLE_RAFT_ID, raft.id);
        export_to_env_if_not_present(POLE_RAFT_ADDR, raft.address);
        export_to_env_if_not_present(POLE_RAFT_DATA_DIR, raft.data_dir);
        export_to_env_if_not_present(POLE_RAFT_BOOTSTRAP, raft.bootstrap.to_string());
    }
}

fn export_to_env_if_not_present<T: AsRef<OsStr>>(key: &str, value: T) {
    if env::var(key).is_err() {
        env::set_var(key, value);
    }
}

fn default_index_uri() -> String {
    DEFAULT_INDEX_URI.to_string()
}

fn default_http_addr() -> String {
    DEFAULT_HTTP_ADDR.to_string()
}

fn default_grpc_addr() -> String {
    DEFAULT_GRPC_ADDR.to_string()
}

fn default_data_path() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_PATH)
}

fn default_web_path() -> PathBuf {
    PathBuf::from(DEFAULT_WEB_PATH)
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_raft_id() -> String {
    DEFAULT_RAFT_ID.to_string()
}

fn default_raft_addr() -> String {
    DEFAULT_RAFT_ADDR.to_string()
}

fn default_raft_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_RAFT_DATA_DIR)
}
