use comms::{Collective, OnoReceiver, OnoSender, StarGroup};
use tokio::io::{self, DuplexStream, ReadHalf, WriteHalf};

type Group = StarGroup<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;
type Chan = (
    OnoReceiver<ReadHalf<DuplexStream>>,
    OnoSender<WriteHalf<DuplexStream>>,
);

fn channel_pair() -> (Chan, Chan) {
    let (stream1, stream2) = io::duplex(4096);
    let (rx1, tx1) = io::split(stream1);
    let (rx2, tx2) = io::split(stream2);
    (comms::channel(rx1, tx1), comms::channel(rx2, tx2))
}

fn star(world_size: usize) -> Vec<Group> {
    let mut hub_side = Vec::new();
    let mut spokes = Vec::new();

    for rank in 1..world_size {
        let (hub_chan, spoke_chan) = channel_pair();
        hub_side.push(hub_chan);
        let (rx, tx) = spoke_chan;
        spokes.push(StarGroup::spoke(rank, world_size, rx, tx).unwrap());
    }

    let mut groups = vec![StarGroup::hub(hub_side)];
    groups.extend(spokes);
    groups
}

#[tokio::test(flavor = "multi_thread")]
async fn gather_and_broadcast_through_the_hub() {
    let handles: Vec<_> = star(3)
        .into_iter()
        .map(|mut group| {
            tokio::spawn(async move {
                let rank = group.rank() as f32;
                let gathered = group.gather_all(&[rank, -rank]).await.unwrap();
                let from_two = group.broadcast(vec![rank; 3], 2).await.unwrap();
                let from_hub = group.broadcast(vec![rank + 0.5], 0).await.unwrap();
                group.disconnect().await.unwrap();
                (gathered, from_two, from_hub)
            })
        })
        .collect();

    for handle in handles {
        let (gathered, from_two, from_hub) = handle.await.unwrap();
        assert_eq!(
            gathered,
            vec![vec![0.0, -0.0], vec![1.0, -1.0], vec![2.0, -2.0]]
        );
        assert_eq!(from_two, vec![2.0; 3]);
        assert_eq!(from_hub, vec![0.5]);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn uneven_contributions_fail_on_every_worker() {
    let handles: Vec<_> = star(2)
        .into_iter()
        .map(|mut group| {
            tokio::spawn(async move {
                let tensor = vec![1.0; group.rank() + 1];
                group.gather_all(&tensor).await.is_err()
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap());
    }
}

#[test]
fn spoke_cannot_take_the_hub_rank() {
    let (_, (rx, tx)) = channel_pair();
    assert!(Group::spoke(0, 2, rx, tx).is_err());
}
