// A client that resends an RPC after a lost reply must not have its
// mutation applied twice: the per-client `opNum` dedup gate must catch it.

mod common;

use common::TestCluster;
use kvraft::rpc::call_put_append;
use kvraft::types::{Op, PutAppendRequest};
use std::time::Duration;

#[tokio::test]
async fn resent_append_is_applied_once() {
    let cluster = TestCluster::new(3, None).await;
    let clerk = cluster.clerk(42);

    clerk.put("ctr", "").await;

    // A distinct client identity from the clerk above, so this op_num=1 is
    // genuinely the first thing this "client" has ever sent.
    let req = PutAppendRequest {
        key: "ctr".to_string(),
        value: "x".to_string(),
        op: Op::Append,
        client_id: 43,
        op_num: 1,
    };

    let mut accepted = 0;
    for node in &cluster.node_ids {
        if let Ok(reply) = call_put_append(&cluster.network, *node, req.clone()).await {
            if !reply.wrong_leader {
                accepted += 1;
                break;
            }
        }
    }
    assert_eq!(accepted, 1, "exactly one server should have accepted the op as leader");

    // Resend the identical (client_id, op_num) pair, as a client would after
    // a dropped reply. The leader must recognize it as already applied.
    for node in &cluster.node_ids {
        let _ = call_put_append(&cluster.network, *node, req.clone()).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(clerk.get("ctr").await, "x");
}
