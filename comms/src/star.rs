//! A hub-and-spoke worker group over framed channels.
//!
//! Rank 0 is the hub: every other worker only talks to it, and the hub relays
//! contributions so that each collective costs two hops regardless of the group size.

use std::{borrow::Cow, io, time::Duration};

use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time,
};

use crate::{
    Collective, CommErr, OnoReceiver, OnoSender, Result,
    msg::{Command, Msg, Payload},
};

const CONNECT_ATTEMPTS: usize = 50;
const CONNECT_BACKOFF: Duration = Duration::from_millis(200);

/// A star group whose links are TCP connections.
pub type TcpStarGroup = StarGroup<OwnedReadHalf, OwnedWriteHalf>;

struct Link<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rx: OnoReceiver<R>,
    tx: OnoSender<W>,
}

enum Topology<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// One link per peer, the i-th one leading to rank i + 1.
    Hub { peers: Vec<Link<R, W>> },
    Spoke { hub: Link<R, W> },
}

/// A worker group where rank 0 relays every collective.
pub struct StarGroup<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rank: usize,
    world_size: usize,
    topology: Topology<R, W>,
    rx_buf: Vec<u32>,
}

impl<R, W> StarGroup<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Creates the hub (rank 0) of a group.
    ///
    /// # Arguments
    /// * `peers` - The channels to every other worker, the i-th one leading to rank i + 1.
    pub fn hub(peers: Vec<(OnoReceiver<R>, OnoSender<W>)>) -> Self {
        let world_size = peers.len() + 1;
        let peers = peers.into_iter().map(|(rx, tx)| Link { rx, tx }).collect();

        Self {
            rank: 0,
            world_size,
            topology: Topology::Hub { peers },
            rx_buf: Vec::new(),
        }
    }

    /// Creates a non-hub member of a group.
    ///
    /// # Arguments
    /// * `rank` - This worker's rank, must be in `1..world_size`.
    /// * `world_size` - The amount of workers in the group.
    /// * `rx` - The receiving end of the channel to the hub.
    /// * `tx` - The sending end of the channel to the hub.
    ///
    /// # Returns
    /// An `InvalidRank` error if `rank` is 0 or not lower than `world_size`.
    pub fn spoke(
        rank: usize,
        world_size: usize,
        rx: OnoReceiver<R>,
        tx: OnoSender<W>,
    ) -> Result<Self> {
        if rank == 0 || rank >= world_size {
            return Err(CommErr::InvalidRank { rank, world_size });
        }

        Ok(Self {
            rank,
            world_size,
            topology: Topology::Spoke {
                hub: Link { rx, tx },
            },
            rx_buf: Vec::new(),
        })
    }

    /// Leaves the group gracefully.
    ///
    /// Spokes announce they are leaving, the hub waits for every spoke to do so.
    pub async fn disconnect(self) -> Result<()> {
        let mut rx_buf = self.rx_buf;

        match self.topology {
            Topology::Spoke { mut hub } => {
                hub.tx.send(&Msg::Control(Command::Disconnect)).await?;
            }
            Topology::Hub { mut peers } => {
                for (i, peer) in peers.iter_mut().enumerate() {
                    loop {
                        let msg: Msg = peer.rx.recv_into(&mut rx_buf).await?;
                        if matches!(msg, Msg::Control(Command::Disconnect)) {
                            break;
                        }

                        warn!(rank = i + 1; "discarding {} while disconnecting", msg.kind());
                    }
                }
            }
        }

        Ok(())
    }
}

impl<R, W> Collective for StarGroup<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn gather_all(&mut self, tensor: &[f32]) -> Result<Vec<Vec<f32>>> {
        let rank = self.rank;
        let world_size = self.world_size;
        let Self {
            topology, rx_buf, ..
        } = self;

        match topology {
            Topology::Hub { peers } => {
                let expected = tensor.len();
                let mut gathered = Vec::with_capacity(world_size);
                let mut mismatch = None;
                gathered.push(tensor.to_vec());

                for (i, peer) in peers.iter_mut().enumerate() {
                    let part = recv_tensor(&mut peer.rx, rx_buf).await?;

                    if part.len() != expected && mismatch.is_none() {
                        mismatch = Some(CommErr::ShardSizeMismatch {
                            rank: i + 1,
                            got: part.len(),
                            expected,
                        });
                    }

                    gathered.push(part);
                }

                if let Some(err) = mismatch {
                    let detail = err.to_string();
                    let msg = Msg::Err(Cow::Borrowed(detail.as_str()));

                    for peer in peers.iter_mut() {
                        peer.tx.send(&msg).await?;
                    }

                    return Err(err);
                }

                let flat = gathered.concat();
                let msg = Msg::Data(Payload::Tensor(&flat));
                for peer in peers.iter_mut() {
                    peer.tx.send(&msg).await?;
                }

                debug!(world_size = world_size, len = expected; "hub gathered tensors");
                Ok(gathered)
            }
            Topology::Spoke { hub } => {
                hub.tx.send(&Msg::Data(Payload::Tensor(tensor))).await?;
                let flat = recv_tensor(&mut hub.rx, rx_buf).await?;

                if flat.len() != tensor.len() * world_size {
                    return Err(CommErr::ShardSizeMismatch {
                        rank,
                        got: flat.len(),
                        expected: tensor.len() * world_size,
                    });
                }

                if tensor.is_empty() {
                    return Ok(vec![Vec::new(); world_size]);
                }

                Ok(flat.chunks(tensor.len()).map(<[f32]>::to_vec).collect())
            }
        }
    }

    async fn broadcast(&mut self, tensor: Vec<f32>, src: usize) -> Result<Vec<f32>> {
        if src >= self.world_size {
            return Err(CommErr::InvalidRank {
                rank: src,
                world_size: self.world_size,
            });
        }

        let rank = self.rank;
        let Self {
            topology, rx_buf, ..
        } = self;

        match topology {
            Topology::Hub { peers } => {
                let value = if src == 0 {
                    tensor
                } else {
                    recv_tensor(&mut peers[src - 1].rx, rx_buf).await?
                };

                let msg = Msg::Data(Payload::Tensor(&value));
                for (i, peer) in peers.iter_mut().enumerate() {
                    if i + 1 != src {
                        peer.tx.send(&msg).await?;
                    }
                }

                Ok(value)
            }
            Topology::Spoke { hub } if rank == src => {
                hub.tx.send(&Msg::Data(Payload::Tensor(&tensor))).await?;
                Ok(tensor)
            }
            Topology::Spoke { hub } => recv_tensor(&mut hub.rx, rx_buf).await,
        }
    }
}

/// Waits for the next tensor on `rx`, copying it out of the receive buffer.
async fn recv_tensor<R>(rx: &mut OnoReceiver<R>, buf: &mut Vec<u32>) -> Result<Vec<f32>>
where
    R: AsyncRead + Unpin,
{
    match rx.recv_into(buf).await? {
        Msg::Data(Payload::Tensor(nums)) => Ok(nums.to_vec()),
        Msg::Err(detail) => Err(CommErr::Remote(detail.into_owned())),
        other => Err(CommErr::UnexpectedMessage { got: other.kind() }),
    }
}

/// Joins a TCP star group.
///
/// The hub binds `hub_addr` and waits for every other rank to connect and introduce
/// itself, the rest connect to it (retrying while the hub is not listening yet).
///
/// # Arguments
/// * `rank` - This worker's rank.
/// * `world_size` - The amount of workers in the group.
/// * `hub_addr` - The address rank 0 listens at.
///
/// # Returns
/// The connected group, or an error if the handshake fails.
pub async fn connect(rank: usize, world_size: usize, hub_addr: &str) -> Result<TcpStarGroup> {
    if rank >= world_size {
        return Err(CommErr::InvalidRank { rank, world_size });
    }

    if rank != 0 {
        let stream = connect_with_retry(hub_addr).await?;
        let (rx, tx) = stream.into_split();
        let (rx, mut tx) = crate::channel(rx, tx);
        tx.send(&Msg::Control(Command::Hello { rank })).await?;
        info!(rank = rank; "joined the group through {hub_addr}");
        return StarGroup::spoke(rank, world_size, rx, tx);
    }

    let listener = TcpListener::bind(hub_addr).await?;
    info!("hub listening at {hub_addr}, waiting for {} peer(s)", world_size - 1);

    let mut peers: Vec<Option<_>> = (1..world_size).map(|_| None).collect();
    let mut buf: Vec<u32> = Vec::new();

    while peers.iter().any(Option::is_none) {
        let (stream, addr) = listener.accept().await?;
        let (rx, tx) = stream.into_split();
        let (mut rx, tx) = crate::channel(rx, tx);

        let peer_rank = match rx.recv_into(&mut buf).await? {
            Msg::Control(Command::Hello { rank }) => rank,
            other => return Err(CommErr::UnexpectedMessage { got: other.kind() }),
        };

        if peer_rank == 0 || peer_rank >= world_size || peers[peer_rank - 1].is_some() {
            return Err(CommErr::InvalidRank {
                rank: peer_rank,
                world_size,
            });
        }

        info!(rank = peer_rank; "peer connected from {addr}");
        peers[peer_rank - 1] = Some((rx, tx));
    }

    Ok(StarGroup::hub(peers.into_iter().flatten().collect()))
}

async fn connect_with_retry(addr: &str) -> io::Result<TcpStream> {
    let mut attempt = 1;

    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                warn!("connecting to {addr} failed ({e}), attempt {attempt}/{CONNECT_ATTEMPTS}");
                attempt += 1;
                time::sleep(CONNECT_BACKOFF).await;
            }
            Err(e) => return Err(e),
        }
    }
}
