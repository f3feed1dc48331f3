// Copyright (C) 2020-2023 The Strata Team
// This file is part of the strata library.

// The strata library is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// The strata library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with the strata library. If not, see <https://www.gnu.org/licenses/>.

use crate::{
    errors::NetworkError,
    message::{codec, Envelope},
    node::Node,
    stream::{Direction, PeerStream},
};

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

/// Binds the listener and starts accepting peers. A port of zero picks an
/// ephemeral one; the bound address is returned and recorded on the node.
pub async fn listen(node: Node) -> Result<SocketAddr, NetworkError> {
    let listener = TcpListener::bind(("0.0.0.0", node.config.peer_port)).await?;
    let local_address = listener.local_addr()?;
    let _ = node.local_address.set(local_address);
    info!("listening for peers on {}", local_address);

    let accept_node = node.clone();
    let accept_task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    spawn_connection(accept_node.clone(), socket, addr, Direction::Inbound);
                }
                Err(error) => {
                    error!("failed to accept a connection: {}", error);
                }
            }
        }
    });
    node.register_task(accept_task);
    Ok(local_address)
}

/// Wires a socket into a `PeerStream`: a writer task draining the outbox and
/// a reader task dispatching envelopes until the stream closes.
pub(crate) fn spawn_connection(
    node: Node,
    socket: TcpStream,
    addr: SocketAddr,
    direction: Direction,
) -> Arc<PeerStream> {
    let framed = Framed::new(socket, codec());
    let (mut sink, mut source) = framed.split();
    let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<String>();
    let stream = PeerStream::new(direction, addr, outbox);

    let writer_stream = stream.clone();
    let writer = tokio::spawn(async move {
        loop {
            if writer_stream.is_closed() {
                // flush anything already queued before dropping the socket
                while let Ok(line) = outbox_rx.try_recv() {
                    if sink.send(line).await.is_err() {
                        break;
                    }
                }
                break;
            }
            tokio::select! {
                _ = writer_stream.closed_signal() => continue,
                line = outbox_rx.recv() => match line {
                    Some(line) => {
                        if sink.send(line).await.is_err() {
                            writer_stream.close();
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    });
    node.register_task(writer);

    let reader_node = node.clone();
    let reader_stream = stream.clone();
    let reader = tokio::spawn(async move {
        loop {
            if reader_stream.is_closed() {
                break;
            }
            tokio::select! {
                _ = reader_stream.closed_signal() => break,
                next = source.next() => match next {
                    Some(Ok(line)) => {
                        reader_stream.touch();
                        match direction {
                            Direction::Inbound => reader_node.health.tcp_server.touch(),
                            Direction::Outbound => reader_node.health.tcp_client.touch(),
                        }

                        let envelope: Envelope = match serde_json::from_str(&line) {
                            Ok(envelope) => envelope,
                            Err(error) => {
                                warn!("bad data from {}: {}", addr, error);
                                reader_node.remove_stream(&reader_stream);
                                break;
                            }
                        };

                        // an arriving response settles its pending request
                        if envelope.result.is_some() {
                            reader_stream.clear_pending(&envelope.method, &envelope.id);
                        }

                        if let Err(error) =
                            reader_node.handle_message(&reader_stream, envelope).await
                        {
                            warn!("handler failure from {}: {}", addr, error);
                        }
                    }
                    Some(Err(error)) => {
                        warn!("codec failure from {}: {}", addr, error);
                        reader_node.remove_stream(&reader_stream);
                        break;
                    }
                    None => {
                        if let Some(peer) = reader_stream.peer() {
                            warn!("disconnected from {}: {}", peer.role, peer);
                        }
                        reader_node.remove_stream(&reader_stream);
                        break;
                    }
                }
            }
        }
    });
    node.register_task(reader);

    stream
}
