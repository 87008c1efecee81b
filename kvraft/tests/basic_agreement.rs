mod common;

use common::TestCluster;

#[tokio::test]
async fn put_then_get_from_any_peer() {
    let cluster = TestCluster::new(3, None).await;
    let clerk = cluster.clerk(1);

    clerk.put("a", "1").await;
    assert_eq!(clerk.get("a").await, "1");
}

#[tokio::test]
async fn append_concatenates() {
    let cluster = TestCluster::new(3, None).await;
    let clerk = cluster.clerk(2);

    clerk.put("k", "x").await;
    clerk.append("k", "y").await;
    clerk.append("k", "z").await;
    assert_eq!(clerk.get("k").await, "xyz");
}

#[tokio::test]
async fn append_on_missing_key_creates_it() {
    let cluster = TestCluster::new(3, None).await;
    let clerk = cluster.clerk(3);

    clerk.append("brand-new", "first").await;
    assert_eq!(clerk.get("brand-new").await, "first");
}

#[tokio::test]
async fn concurrent_clients_converge_on_one_value() {
    let cluster = TestCluster::new(3, None).await;
    let x = cluster.clerk(10);
    let y = cluster.clerk(11);

    tokio::join!(x.put("k", "X"), y.put("k", "Y"));

    let value = x.get("k").await;
    assert!(value == "X" || value == "Y");
    // Every peer must agree with whichever value won.
    assert_eq!(y.get("k").await, value);
}
