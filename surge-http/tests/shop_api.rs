use surge_http::{HttpClient, HttpRequest};
use surge_testserver::{STARTING_COINS, TestServer};

async fn login(client: &HttpClient, server: &TestServer, user: &str) -> anyhow::Result<String> {
    let req = HttpRequest::post_json(
        &server.urls().auth,
        &serde_json::json!({ "username": user, "password": "testpass" }),
    )?;
    let res = client.request(req).await?;
    anyhow::ensure!(res.status == 200, "auth failed: {}", res.status);

    let body: serde_json::Value = res.json()?;
    body["token"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("missing token in {body}"))
}

#[tokio::test]
async fn auth_buy_and_info_flow() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let client = HttpClient::default();

    let token = login(&client, &server, "user1").await?;

    let res = client
        .request(HttpRequest::get(server.urls().buy("cup")).bearer(&token))
        .await?;
    anyhow::ensure!(res.status == 200, "buy failed: {:?}", res.body_utf8());
    anyhow::ensure!(res.duration > std::time::Duration::ZERO);

    let res = client
        .request(HttpRequest::get(&server.urls().info).bearer(&token))
        .await?;
    anyhow::ensure!(res.status == 200);
    let info: serde_json::Value = res.json()?;
    anyhow::ensure!(info["coins"] == STARTING_COINS - 20, "info={info}");
    anyhow::ensure!(info["inventory"][0]["type"] == "cup", "info={info}");

    anyhow::ensure!(server.stats().purchases() == 1);
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn rejected_requests_surface_status_codes() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let client = HttpClient::default();

    let res = client.get(&server.urls().info).await?;
    anyhow::ensure!(res.status == 401, "status={}", res.status);

    let token = login(&client, &server, "user2").await?;
    let res = client
        .request(HttpRequest::get(server.urls().buy("yacht")).bearer(&token))
        .await?;
    anyhow::ensure!(res.status == 400, "status={}", res.status);
    let body: serde_json::Value = res.json()?;
    anyhow::ensure!(body["errors"] == "item not found", "body={body}");

    let wrong = HttpRequest::post_json(
        &server.urls().auth,
        &serde_json::json!({ "username": "user2", "password": "nope" }),
    )?;
    anyhow::ensure!(client.request(wrong).await?.status == 401);

    anyhow::ensure!(server.stats().rejected() == 3);
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn send_coin_moves_balance_between_users() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let client = HttpClient::default();

    let sender = login(&client, &server, "alice").await?;
    login(&client, &server, "bob").await?;

    let req = HttpRequest::post_json(
        &server.urls().send_coin,
        &serde_json::json!({ "toUser": "bob", "amount": 40 }),
    )?
    .bearer(&sender);
    let res = client.request(req).await?;
    anyhow::ensure!(res.status == 200, "send failed: {:?}", res.body_utf8());

    anyhow::ensure!(server.shop().coins("alice").await == Some(STARTING_COINS - 40));
    anyhow::ensure!(server.shop().coins("bob").await == Some(STARTING_COINS + 40));
    anyhow::ensure!(server.stats().transfers() == 1);

    server.shutdown().await;
    Ok(())
}
