use super::*;

#[tokio::test]
#[timeout(30000)]
async fn subscribe_sends_difficulty_then_job() {
    let pool = TestPool::spawn().await;
    let mut client = pool.connect().await;

    let subscribe = client.call("mining.subscribe", json!(["cpuminer/2.5.1"])).await;

    let result = subscribe["result"].as_array().unwrap();
    pretty_assert_eq!(result.len(), 3);
    pretty_assert_eq!(result[1].as_str().unwrap().len(), 8);
    pretty_assert_eq!(result[2], json!(4));

    let set_difficulty = client.expect().await;
    pretty_assert_eq!(set_difficulty["method"], "mining.set_difficulty");

    let notify = client.expect().await;
    pretty_assert_eq!(notify["method"], "mining.notify");
    pretty_assert_eq!(notify["params"].as_array().unwrap().len(), 9);
    pretty_assert_eq!(notify["params"][6], "1d00ffff");
    pretty_assert_eq!(notify["params"][7], NTIME);
    pretty_assert_eq!(notify["params"][8], json!(true));
}

#[tokio::test]
#[timeout(30000)]
async fn valid_then_duplicate_share() {
    let mut pool = TestPool::spawn().await;
    let mut client = pool.connect().await;

    let job_id = client.login().await;

    let accepted = client.submit(&job_id, "00000000", "fe1a0000").await;
    pretty_assert_eq!(accepted["result"], json!(true));
    assert!(accepted["error"].is_null());

    assert!(matches!(
        share_result(pool.wait_for(is_share).await),
        ShareResult::Valid(_)
    ));

    let duplicate = client.submit(&job_id, "00000000", "fe1a0000").await;
    assert!(duplicate["result"].is_null());
    pretty_assert_eq!(duplicate["error"], json!([22, "duplicate share", null]));

    assert!(matches!(
        share_result(pool.wait_for(is_share).await),
        ShareResult::Invalid { .. }
    ));
}

#[tokio::test]
#[timeout(30000)]
async fn unknown_job_is_rejected() {
    let pool = TestPool::spawn().await;
    let mut client = pool.connect().await;

    client.login().await;

    let response = client.submit("ffff", "00000000", "fe1a0000").await;
    pretty_assert_eq!(response["error"], json!([21, "job not found", null]));
}

#[tokio::test]
#[timeout(30000)]
async fn submit_requires_authorization() {
    let pool = TestPool::spawn().await;
    let mut client = pool.connect().await;

    client.call("mining.subscribe", json!([])).await;
    client.expect().await;
    let notify = client.expect().await;

    let job_id = notify["params"][0].as_str().unwrap().to_string();

    let response = client.submit(&job_id, "00000000", "fe1a0000").await;
    pretty_assert_eq!(response["error"], json!([24, "unauthorized worker", null]));
}

#[tokio::test]
#[timeout(30000)]
async fn malformed_submission_is_rejected() {
    let pool = TestPool::spawn().await;
    let mut client = pool.connect().await;

    client.login().await;

    let response = client.call("mining.submit", json!(["worker", "1"])).await;
    pretty_assert_eq!(response["error"], json!([20, "malformed submission", null]));
}

#[tokio::test]
#[timeout(30000)]
async fn configure_enables_version_rolling() {
    let pool = TestPool::spawn().await;
    let mut client = pool.connect().await;

    let response = client
        .call(
            "mining.configure",
            json!([["version-rolling"], {"version-rolling.mask": "ffffffff"}]),
        )
        .await;

    pretty_assert_eq!(
        response["result"],
        json!({"version-rolling": true, "version-rolling.mask": "1fffe000"})
    );
}

#[tokio::test]
#[timeout(30000)]
async fn unsupported_methods_answer_with_error() {
    let pool = TestPool::spawn().await;
    let mut client = pool.connect().await;

    let transactions = client.call("mining.get_transactions", json!(["1"])).await;
    pretty_assert_eq!(transactions["result"], json!([]));
    pretty_assert_eq!(transactions["error"], json!([20, "Not supported.", null]));

    let extranonce = client.call("mining.extranonce.subscribe", json!([])).await;
    pretty_assert_eq!(extranonce["result"], json!(false));
}

#[tokio::test]
#[timeout(30000)]
async fn unknown_method_disconnects() {
    let mut pool = TestPool::spawn().await;
    let mut client = pool.connect().await;

    client.request("mining.bogus", json!([])).await;
    client.closed().await;

    let Event::Client(event) = pool.wait_for(is_client(ClientEventKind::UnknownMethod)).await
    else {
        unreachable!()
    };

    pretty_assert_eq!(event.detail, Some("mining.bogus".into()));
}

#[tokio::test]
#[timeout(30000)]
async fn malformed_json_disconnects() {
    let mut pool = TestPool::spawn().await;
    let mut client = pool.connect().await;

    client.send_raw("this is not json").await;
    client.closed().await;

    pool.wait_for(is_client(ClientEventKind::Malformed)).await;
    pool.wait_for(is_client(ClientEventKind::Disconnected)).await;
}

#[tokio::test]
#[timeout(30000)]
async fn flooding_disconnects() {
    let mut pool = TestPool::spawn().await;
    let mut client = pool.connect().await;

    client
        .writer
        .write_all(&vec![b'x'; stratapool::MAX_MESSAGE_SIZE + 1])
        .await
        .unwrap();

    client.closed().await;

    pool.wait_for(is_client(ClientEventKind::Flooded)).await;
}

#[tokio::test]
#[timeout(30000)]
async fn broadcast_reaches_client() {
    let pool = TestPool::spawn().await;
    let mut client = pool.connect().await;

    let job_id = client.login().await;

    assert!(pool.registry.broadcast(false));

    let notify = client.expect().await;
    pretty_assert_eq!(notify["method"], "mining.notify");
    pretty_assert_eq!(notify["params"][0], json!(job_id));
    pretty_assert_eq!(notify["params"][8], json!(false));
}

#[tokio::test]
#[timeout(30000)]
async fn too_many_invalid_shares_ban_the_address() {
    let mut pool = TestPool::spawn_with(|settings, _| {
        settings.banning = BanSettings {
            check_threshold: 3,
            invalid_percent: 50.0,
            ..Default::default()
        };
    })
    .await;

    let mut client = pool.connect().await;
    client.login().await;

    for _ in 0..2 {
        let response = client.submit("ffff", "00000000", "fe1a0000").await;
        pretty_assert_eq!(response["error"][0], json!(21));
    }

    client.request("mining.submit", json!(["x", "ffff", "00000000", NTIME, "fe1a0000"])).await;
    client.closed().await;

    pool.wait_for(is_client(ClientEventKind::Banned)).await;

    let mut again = pool.connect().await;
    again.closed().await;

    let Event::Client(kicked) = pool.wait_for(is_client(ClientEventKind::Kicked)).await else {
        unreachable!()
    };

    assert!(kicked.detail.is_some());
}

#[tokio::test]
#[timeout(30000)]
async fn mostly_valid_shares_reset_the_tally() {
    let pool = TestPool::spawn_with(|settings, _| {
        settings.banning = BanSettings {
            check_threshold: 4,
            invalid_percent: 60.0,
            ..Default::default()
        };
    })
    .await;

    let mut client = pool.connect().await;
    let job_id = client.login().await;

    for nonce in ["fe1a0000", "fe1a0001"] {
        let response = client.submit(&job_id, "00000000", nonce).await;
        pretty_assert_eq!(response["result"], json!(true));
    }

    for _ in 0..2 {
        let response = client.submit("ffff", "00000000", "fe1a0000").await;
        pretty_assert_eq!(response["error"][0], json!(21));
    }

    let response = client.submit("ffff", "00000000", "fe1a0000").await;
    pretty_assert_eq!(response["error"][0], json!(21));
}

#[tokio::test]
#[timeout(30000)]
async fn requests_without_numeric_ids_are_answered() {
    let pool = TestPool::spawn().await;
    let mut client = pool.connect().await;

    client
        .send_raw(r#"{"id":null,"method":"mining.subscribe","params":[]}"#)
        .await;

    let subscribe = client.expect().await;
    assert!(subscribe["id"].is_null());
    pretty_assert_eq!(subscribe["result"].as_array().unwrap().len(), 3);

    client.expect().await;
    client.expect().await;

    client
        .send_raw(r#"{"method":"mining.extranonce.subscribe","params":[]}"#)
        .await;

    let extranonce = client.expect().await;
    assert!(extranonce["id"].is_null());
    pretty_assert_eq!(extranonce["result"], json!(false));

    client
        .send_raw(r#"{"id":-1,"method":"mining.get_transactions","params":[]}"#)
        .await;

    let transactions = client.expect().await;
    pretty_assert_eq!(transactions["id"], json!(-1));

    client
        .send_raw(r#"{"id":2.5,"method":"mining.get_transactions","params":[]}"#)
        .await;

    let transactions = client.expect().await;
    pretty_assert_eq!(transactions["id"], json!(2.5));
}

#[tokio::test]
#[timeout(30000)]
async fn invalid_utf8_disconnects_as_malformed() {
    let mut pool = TestPool::spawn().await;
    let mut client = pool.connect().await;

    client.writer.write_all(&[0xff, 0xfe, b'\n']).await.unwrap();
    client.closed().await;

    pool.wait_for(is_client(ClientEventKind::Malformed)).await;
}

#[tokio::test]
#[timeout(30000)]
async fn submit_before_subscribe_is_rejected() {
    let pool = TestPool::spawn().await;
    let mut client = pool.connect().await;

    let authorize = client
        .call(
            "mining.authorize",
            json!(["bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq.rig", "x"]),
        )
        .await;
    pretty_assert_eq!(authorize["result"], json!(true));

    let response = client.submit("1", "00000000", "fe1a0000").await;
    pretty_assert_eq!(response["error"], json!([25, "not subscribed", null]));
}

#[tokio::test]
#[timeout(30000)]
async fn idle_client_times_out_on_broadcast() {
    let mut pool = TestPool::spawn_with(|settings, _| {
        settings.timeouts = TimeoutSettings {
            connection_secs: 1,
            ..Default::default()
        };
    })
    .await;

    let mut client = pool.connect().await;
    client.login().await;

    tokio::time::sleep(Duration::from_millis(1500)).await;

    pool.registry.broadcast(false);
    client.closed().await;

    pool.wait_for(is_client(ClientEventKind::TimedOut)).await;
}

#[tokio::test]
#[timeout(30000)]
async fn password_difficulty_precedes_next_job() {
    let mut pool = TestPool::spawn().await;
    let mut client = pool.connect().await;

    let job_id = client.login_with("x,d=2").await;

    let Event::Client(queued) = pool
        .wait_for(is_client(ClientEventKind::DifficultyQueued))
        .await
    else {
        unreachable!()
    };
    pretty_assert_eq!(queued.difficulty, Some(2.0));

    assert!(pool.registry.broadcast(false));

    let set_difficulty = client.expect().await;
    pretty_assert_eq!(set_difficulty["method"], "mining.set_difficulty");
    pretty_assert_eq!(set_difficulty["params"], json!([2]));

    let notify = client.expect().await;
    pretty_assert_eq!(notify["method"], "mining.notify");
    pretty_assert_eq!(notify["params"][0], json!(job_id));

    assert!(pool.registry.broadcast(false));

    let notify = client.expect().await;
    pretty_assert_eq!(notify["method"], "mining.notify");
}

#[tokio::test]
#[timeout(30000)]
async fn unchanged_difficulty_is_not_resent() {
    let pool = TestPool::spawn().await;
    let mut client = pool.connect().await;

    client.login_with("d=0.000000000001").await;

    assert!(pool.registry.broadcast(false));

    let notify = client.expect().await;
    pretty_assert_eq!(notify["method"], "mining.notify");
}

#[tokio::test]
#[timeout(30000)]
async fn previous_difficulty_is_honoured_until_retarget() {
    let pool = TestPool::spawn().await;
    let mut client = pool.connect().await;

    let job_id = client.login_with("d=1").await;

    assert!(pool.registry.broadcast(false));

    let set_difficulty = client.expect().await;
    pretty_assert_eq!(set_difficulty["params"], json!([1]));
    client.expect().await;

    let response = client.submit(&job_id, "00000000", "fe1a0000").await;
    pretty_assert_eq!(response["result"], json!(true));
}

#[tokio::test]
#[timeout(30000)]
async fn previous_difficulty_expires_after_retarget() {
    let pool = TestPool::spawn_with(|settings, _| {
        settings.ports[0].difficulty.retarget_time = 0.05;
    })
    .await;

    let mut client = pool.connect().await;

    let job_id = client.login_with("d=1").await;

    assert!(pool.registry.broadcast(false));
    client.expect().await;
    client.expect().await;

    tokio::time::sleep(Duration::from_millis(200)).await;

    let response = client.submit(&job_id, "00000000", "fe1a0000").await;
    pretty_assert_eq!(response["error"][0], json!(23));
}

/// Every share meets a target of all ones, so difficulty never rejects one.
fn fast_miner(settings: &mut Settings, template: &mut BlockTemplate) {
    settings.ports[0].difficulty = DifficultySettings {
        initial: 1.0,
        minimum: 1.0,
        maximum: 64.0,
        target_time: 10.0,
        retarget_time: 0.001,
        variance: 0.3,
    };

    template.target = Some("ff".repeat(32));
}

async fn submit_two_quick_shares(client: &mut Client, job_id: &str) {
    for nonce in ["00000000", "00000001"] {
        let response = client.submit(job_id, "00000000", nonce).await;
        pretty_assert_eq!(response["result"], json!(true));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
#[timeout(30000)]
async fn vardiff_raises_difficulty_for_fast_miner() {
    let mut pool = TestPool::spawn_with(fast_miner).await;
    let mut client = pool.connect().await;

    let job_id = client.login().await;

    submit_two_quick_shares(&mut client, &job_id).await;

    let Event::Client(queued) = pool
        .wait_for(is_client(ClientEventKind::DifficultyQueued))
        .await
    else {
        unreachable!()
    };
    pretty_assert_eq!(queued.difficulty, Some(64.0));

    assert!(pool.registry.broadcast(false));

    let set_difficulty = client.expect().await;
    pretty_assert_eq!(set_difficulty["method"], "mining.set_difficulty");
    pretty_assert_eq!(set_difficulty["params"], json!([64]));

    pretty_assert_eq!(client.expect().await["method"], "mining.notify");
}

#[tokio::test]
#[timeout(30000)]
async fn password_difficulty_stops_vardiff() {
    let pool = TestPool::spawn_with(fast_miner).await;
    let mut client = pool.connect().await;

    let job_id = client.login_with("d=2").await;

    submit_two_quick_shares(&mut client, &job_id).await;

    assert!(pool.registry.broadcast(false));

    let set_difficulty = client.expect().await;
    pretty_assert_eq!(set_difficulty["params"], json!([2]));
    pretty_assert_eq!(client.expect().await["method"], "mining.notify");

    assert!(pool.registry.broadcast(false));

    pretty_assert_eq!(client.expect().await["method"], "mining.notify");
}

#[tokio::test]
#[timeout(30000)]
async fn multi_version_toggles_version_rolling() {
    let pool = TestPool::spawn().await;
    let mut client = pool.connect().await;

    let job_id = client.login().await;

    client
        .send_raw(r#"{"id":null,"method":"mining.multi_version","params":[4]}"#)
        .await;

    let rolled = client.submit_version(&job_id, "fe1a0000", "00002000").await;
    pretty_assert_eq!(rolled["result"], json!(true));

    let outside_mask = client.submit_version(&job_id, "fe1a0001", "00000001").await;
    pretty_assert_eq!(outside_mask["error"], json!([20, "invalid version bit", null]));

    client
        .send_raw(r#"{"id":null,"method":"mining.multi_version","params":[1]}"#)
        .await;

    let ignored = client.submit_version(&job_id, "fe1a0002", "00000001").await;
    pretty_assert_eq!(ignored["result"], json!(true));
}
