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

use crate::handler::BaseHandler;
use crate::http::HttpHandler;
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;

#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    async fn serve(&self, addr: SocketAddr)
        -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// HTTP connection manager using Axum.
#[derive(Clone)]
pub struct HttpConnectionManager {
    handler: HttpHandler,
}

impl HttpConnectionManager {
    pub fn new(handler: BaseHandler) -> Self {
        Self {
            handler: HttpHandler::new(handler),
        }
    }
}

/// Listening socket with latency oriented options. Uploads are large, so
/// receive buffers are raised too.
pub fn bind_listener(addr: SocketAddr) -> std::io::Result<tokio::net::TcpListener> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    socket.set_nodelay(true)?;
    socket.set_recv_buffer_size(4 * 1024 * 1024)?;
    socket.set_send_buffer_size(4 * 1024 * 1024)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;

    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    tokio::net::TcpListener::from_std(socket.into())
}

#[async_trait]
impl ConnectionManager for HttpConnectionManager {
    async fn serve(
        &self,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let app = self.handler.clone().router();
        let listener = bind_listener(addr)?;
        tracing::info!(%addr, "HTTP server listening (TCP_NODELAY, 4MB buffers)");

        axum::serve(listener, app).await?;
        Ok(())
    }
}
