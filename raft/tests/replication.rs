mod common;

use common::TestCluster;
use std::time::Duration;

#[tokio::test]
async fn replicates_and_applies_in_order() {
    let cluster = TestCluster::new(3).await;
    let leader = cluster.await_leader(Duration::from_secs(2)).await;

    for i in 0..5u8 {
        let (_, _, is_leader) = cluster.peers[leader].propose(vec![i]);
        assert!(is_leader);
    }

    for i in 0..cluster.peers.len() {
        cluster.wait_for_commits(i, 5, Duration::from_secs(2)).await;
    }
}

#[tokio::test]
async fn minority_partition_does_not_commit() {
    let cluster = TestCluster::new(5).await;
    let leader = cluster.await_leader(Duration::from_secs(2)).await;

    let followers: Vec<usize> = (0..cluster.peers.len()).filter(|&i| i != leader).collect();
    for &f in followers.iter().take(3) {
        cluster.partition(f);
    }

    let (index, _, is_leader) = cluster.peers[leader].propose(vec![42]);
    assert!(is_leader);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        cluster.committed_count(leader).await,
        0,
        "a minority cannot commit index {index}"
    );
}
