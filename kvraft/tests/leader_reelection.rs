// A client must keep making progress across a leader failover, retrying
// until it finds whichever peer now reports leadership, exercised here at
// the service layer rather than the raw consensus core.

mod common;

use common::TestCluster;
use std::time::Duration;

#[tokio::test]
async fn client_survives_leader_partition() {
    let cluster = TestCluster::new(5, None).await;
    let clerk = cluster.clerk(7);

    clerk.put("a", "1").await;
    assert_eq!(clerk.get("a").await, "1");

    let leader = (0..cluster.servers.len())
        .find(|&i| cluster.servers[i].raft_peer().state().1)
        .expect("a leader must exist after the first write went through");

    cluster.partition(leader);
    // The clerk's own retry loop rediscovers whichever peer wins the
    // re-election; this just bounds how long that is allowed to take.
    tokio::time::timeout(Duration::from_secs(3), clerk.put("a", "2"))
        .await
        .expect("client should recover a leader within the partition budget");
    cluster.heal(leader);

    assert_eq!(clerk.get("a").await, "2");
}
