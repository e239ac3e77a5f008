use gallery_store::{ApiErrorClass, BucketClient, BucketCredentials, BucketError};
use wiremock::matchers::{body_bytes, header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> BucketClient {
    let credentials = BucketCredentials {
        endpoint: server.uri(),
        access_key_id: "test-access".into(),
        secret_access_key: "test-secret".into(),
    };
    BucketClient::new(&credentials, "photos").unwrap()
}

fn list_page(keys: &[(&str, u64)], next_token: Option<&str>) -> String {
    let contents: String = keys
        .iter()
        .map(|(key, size)| format!("<Contents><Key>{key}</Key><Size>{size}</Size></Contents>"))
        .collect();
    let (truncated, token) = match next_token {
        Some(token) => (
            "true",
            format!("<NextContinuationToken>{token}</NextContinuationToken>"),
        ),
        None => ("false", String::new()),
    };
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <ListBucketResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
         <Name>photos</Name><KeyCount>{}</KeyCount><MaxKeys>1000</MaxKeys>\
         <IsTruncated>{truncated}</IsTruncated>{token}{contents}</ListBucketResult>",
        keys.len()
    )
}

#[tokio::test]
async fn put_object_sends_body_with_content_type() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/photos/events/launch/1.jpg"))
        .and(header("content-type", "image/jpeg"))
        .and(body_bytes(b"jpeg-bytes"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .put_object("events/launch/1.jpg", b"jpeg-bytes".to_vec(), "image/jpeg")
        .await
        .unwrap();
}

#[tokio::test]
async fn delete_object_accepts_no_content() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/photos/events/launch/1_preview.webp"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .delete_object("events/launch/1_preview.webp")
        .await
        .unwrap();
}

#[tokio::test]
async fn list_objects_page_hands_back_continuation_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/photos"))
        .and(query_param("list-type", "2"))
        .and(query_param_is_missing("continuation-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/xml")
                .set_body_string(list_page(&[("a.jpg", 10), ("a_preview.webp", 4)], Some("page-2"))),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/photos"))
        .and(query_param("list-type", "2"))
        .and(query_param("continuation-token", "page-2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/xml")
                .set_body_string(list_page(&[("b.png", 7)], None)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let first = client.list_objects_page(None).await.unwrap();
    assert_eq!(first.next_continuation_token.as_deref(), Some("page-2"));
    let keys: Vec<_> = first.objects.iter().map(|o| o.key.as_str()).collect();
    assert_eq!(keys, vec!["a.jpg", "a_preview.webp"]);
    assert_eq!(first.objects[0].size, 10);

    let second = client
        .list_objects_page(first.next_continuation_token)
        .await
        .unwrap();
    assert_eq!(second.next_continuation_token, None);
    assert_eq!(second.objects.len(), 1);
    assert_eq!(second.objects[0].key, "b.png");
    assert_eq!(second.objects[0].size, 7);
}

#[tokio::test]
async fn forbidden_delete_is_classified_as_auth() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/photos/a.jpg"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("content-type", "application/xml")
                .set_body_string(
                    "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
                     <Error><Code>AccessDenied</Code><Message>Access Denied</Message></Error>",
                ),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.delete_object("a.jpg").await.unwrap_err();

    assert!(matches!(
        &err,
        BucketError::Api {
            operation: "delete",
            status: Some(403),
            ..
        }
    ));
    assert_eq!(err.classification(), Some(ApiErrorClass::Auth));
}
