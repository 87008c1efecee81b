mod common;

use common::TestCluster;
use std::time::Duration;

#[tokio::test]
async fn elects_a_single_leader() {
    let cluster = TestCluster::new(5).await;
    let leader = cluster.await_leader(Duration::from_secs(2)).await;

    let mut leader_count = 0;
    for p in &cluster.peers {
        let (_, is_leader) = p.state();
        if is_leader {
            leader_count += 1;
        }
    }
    assert_eq!(leader_count, 1);
    let _ = leader;
}

#[tokio::test]
async fn re_elects_after_leader_partition() {
    let cluster = TestCluster::new(5).await;
    let leader = cluster.await_leader(Duration::from_secs(2)).await;
    let (first_term, _) = cluster.peers[leader].state();

    cluster.partition(leader);
    tokio::time::sleep(Duration::from_millis(500)).await;

    let new_leader = cluster.await_leader(Duration::from_secs(2)).await;
    assert_ne!(new_leader, leader, "a new leader must emerge in the majority side");
    let (new_term, _) = cluster.peers[new_leader].state();
    assert!(new_term > first_term);

    cluster.heal(leader);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let (healed_term, is_leader) = cluster.peers[leader].state();
    assert!(!is_leader, "rejoining old leader must step down");
    assert!(healed_term >= new_term);
}
