//! Mock upstream fixtures: a paginated listing endpoint and asset files

use serde_json::{Value, json};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Credential accepted by the mock upstream
pub const TEST_CREDENTIAL: &str = "sk-e2e-0123456789abcdef";

/// Bytes served for every image
pub const IMAGE_BYTES: &[u8] = b"\x89PNG\r\n\x1a\ne2e-image";

/// Raw listing entry for image `n` served by `server`
pub fn listing_entry(server: &MockServer, n: usize) -> Value {
    json!({
        "id": format!("gen_{:05}", n),
        "image_url": format!("{}/assets/{}.png", server.uri(), n),
        "thumbnail": format!("{}/assets/{}_thumb.webp", server.uri(), n),
        "prompt": format!("A lighthouse at dusk #{}", n),
        "created_at": format!("2024-03-{:02}T10:00:00Z", (n % 28) + 1),
        "width": 1024,
        "height": 768,
    })
}

/// Mount a listing of `total` images split into pages of `page_size`
///
/// Page `k > 0` is served for `cursor=p{k}`; the first page has no cursor.
pub async fn mount_listing(server: &MockServer, total: usize, page_size: usize) {
    let pages: Vec<Vec<Value>> = (0..total)
        .map(|n| listing_entry(server, n))
        .collect::<Vec<_>>()
        .chunks(page_size.max(1))
        .map(<[Value]>::to_vec)
        .collect();
    let page_count = pages.len().max(1);

    for (k, items) in pages.into_iter().enumerate() {
        let next_cursor = (k + 1 < page_count).then(|| format!("p{}", k + 1));
        let body = json!({ "items": items, "next_cursor": next_cursor });
        let mock = Mock::given(method("GET"))
            .and(path("/images"))
            .and(header("authorization", format!("Bearer {}", TEST_CREDENTIAL).as_str()));
        // Cursor-specific pages win over the cursor-less first page
        let mock = if k == 0 {
            mock.respond_with(ResponseTemplate::new(200).set_body_json(body))
                .with_priority(5)
        } else {
            mock.and(query_param("cursor", format!("p{}", k).as_str()))
                .respond_with(ResponseTemplate::new(200).set_body_json(body))
                .with_priority(1)
        };
        mock.mount(server).await;
    }

    if total == 0 {
        Mock::given(method("GET"))
            .and(path("/images"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "items": [], "next_cursor": null })),
            )
            .mount(server)
            .await;
    }
}

/// Serve every image and thumbnail under `/assets/`
pub async fn mount_assets(server: &MockServer) {
    Mock::given(method("GET"))
        .and(wiremock::matchers::path_regex(r"^/assets/.+$"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(IMAGE_BYTES),
        )
        .mount(server)
        .await;
}

/// Reject every credential
pub async fn mount_auth_failure(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/images"))
        .respond_with(ResponseTemplate::new(401))
        .mount(server)
        .await;
}

/// Requests the mock server received for `at`
pub async fn requests_to(server: &MockServer, at: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == at)
        .count()
}
