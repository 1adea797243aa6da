// TCP front end for the simulated board, speaking the shared line protocol
use crate::board::SimulatedBoard;
use focuser_shared::protocol::{self, Request};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Accept connections forever, one task per client.
pub async fn serve(listener: TcpListener, board: Arc<SimulatedBoard>) -> std::io::Result<()> {
    tracing::info!("Simulated focuser board listening on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::info!("Client connected from {}", peer);
        let board = board.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, board).await {
                tracing::warn!("Client {} dropped: {}", peer, e);
            }
            tracing::info!("Client {} disconnected", peer);
        });
    }
}

async fn handle_client(stream: TcpStream, board: Arc<SimulatedBoard>) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut buffer = String::new();
    loop {
        buffer.clear();
        if protocol::read_line(&mut reader, &mut buffer).await? == 0 {
            break;
        }
        let line = buffer.trim();
        if line.is_empty() {
            continue;
        }
        tracing::debug!("Board <- {}", line);
        let reply = match Request::parse(line).and_then(|request| board.execute(request)) {
            Ok(values) => protocol::ok_reply(&values),
            Err(e) => protocol::err_reply(&e.to_string()),
        };
        tracing::debug!("Board -> {}", reply);
        write_half.write_all(format!("{}\n", reply).as_bytes()).await?;
        write_half.flush().await?;
    }
    Ok(())
}
