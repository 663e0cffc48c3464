// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use clap::Parser;
use mapgate::auth::file_auth::FileAuthenticator;
use mapgate::auth::Authenticator;
use mapgate::config::Config;
use mapgate::handler::BaseHandler;
use mapgate::notify::{ChannelNotifier, Notifier};
use mapgate::observability::tracing_setup;
use mapgate::server::{ConnectionManager, HttpConnectionManager};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "mapgate")]
#[command(about = "Map project publishing server with an authorizing OWS gateway", long_about = None)]
struct Args {
    /// Address to listen on (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<String>,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Path to credentials file
    #[arg(short, long)]
    auth_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_setup::init_tracing_from_env();

    let args = Args::parse();

    // A missing config file means defaults
    let cfg = if Path::new(&args.config).exists() {
        Config::from_path(&args.config)?
    } else {
        tracing::warn!(path = %args.config, "config file not found, using defaults");
        Config::default()
    };

    // Command line args override config file
    let addr: SocketAddr = args.listen.as_ref().unwrap_or(&cfg.listen_addr).parse()?;

    let auth_file = args.auth_file.as_ref().unwrap_or(&cfg.auth_file);
    let auth: Arc<dyn Authenticator> = Arc::new(FileAuthenticator::new(auth_file).await?);
    let notifier: Arc<dyn Notifier> = Arc::new(ChannelNotifier::default());

    let handler = BaseHandler::from_config(&cfg, auth, notifier).await?;
    tracing::info!(
        projects = %cfg.projects.root,
        map_root = %cfg.projects.effective_map_root(),
        mapserver = %cfg.mapserver.url,
        "mapgate starting"
    );

    let server = HttpConnectionManager::new(handler);
    tokio::select! {
        r = server.serve(addr) => {
            if let Err(e) = r {
                tracing::error!("server exited with error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("ctrl-c received, shutting down");
        }
    }

    Ok(())
}
