use std::sync::Arc;

use bytes::Bytes;
use nimbus_db::blob::{BlobBackend, BlobClient, BlobError, LifecyclePolicy, MemoryBackend};

async fn client_with_bucket(bucket: &str) -> (BlobClient, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let client = BlobClient::new(backend.clone(), Some(LifecyclePolicy::new(1, 1).unwrap()));
    client.create_bucket(bucket).await.unwrap();
    (client, backend)
}

#[test_log::test(tokio::test)]
async fn write_read_round_trip() {
    let (client, _) = client_with_bucket("gk-test").await;
    let version = client
        .write_file("gk-test", "/ts-id-2/p", Some(Bytes::from_static(b"some-random-data")))
        .await
        .unwrap();
    assert!(version.is_some());
    let data = client.read_file("gk-test", "/ts-id-2/p", None).await.unwrap();
    assert_eq!(&data[..], b"some-random-data");
}

#[test_log::test(tokio::test)]
async fn nil_and_empty_payloads_differ() {
    let (client, _) = client_with_bucket("gk-test").await;
    let err = client.write_file("gk-test", "/k", None).await.unwrap_err();
    assert!(matches!(err, BlobError::InvalidArgument(ref m) if m == "data cannot be nil"));
    assert!(!client.file_exists("gk-test", "/k").await.unwrap());

    client
        .write_file("gk-test", "/k", Some(Bytes::new()))
        .await
        .unwrap();
    assert!(client.file_exists("gk-test", "/k").await.unwrap());
    assert!(client.read_file("gk-test", "/k", None).await.unwrap().is_empty());
    assert_eq!(client.stat_file("gk-test", "/k").await.unwrap().size, 0);
}

#[test_log::test(tokio::test)]
async fn every_write_keeps_its_version() {
    let (client, _) = client_with_bucket("gk-test").await;
    let v1 = client
        .write_file("gk-test", "/k", Some(Bytes::from_static(b"one")))
        .await
        .unwrap()
        .unwrap();
    let v2 = client
        .write_file("gk-test", "/k", Some(Bytes::from_static(b"two")))
        .await
        .unwrap()
        .unwrap();
    assert_ne!(v1, v2);

    assert_eq!(&client.read_file("gk-test", "/k", None).await.unwrap()[..], b"two");
    assert_eq!(&client.read_file("gk-test", "/k", Some(&v1)).await.unwrap()[..], b"one");
    assert_eq!(&client.read_file("gk-test", "/k", Some(&v2)).await.unwrap()[..], b"two");
    assert_eq!(
        &client.read_file("gk-test", "/k", Some("")).await.unwrap()[..],
        b"two"
    );
    assert!(
        client
            .read_file("gk-test", "/k", Some("no-such-version"))
            .await
            .unwrap_err()
            .is_not_found()
    );
    let info = client.stat_file("gk-test", "/k").await.unwrap();
    assert_eq!(info.version_id.as_deref(), Some(v2.as_str()));
    assert_eq!(info.size, 3);
}

#[test_log::test(tokio::test)]
async fn create_bucket_is_idempotent() {
    let (client, backend) = client_with_bucket("gk-test").await;
    client
        .write_file("gk-test", "/k", Some(Bytes::from_static(b"kept")))
        .await
        .unwrap();

    client.create_bucket("gk-test").await.unwrap();
    client.create_bucket("gk-test").await.unwrap();

    assert!(backend.is_versioned("gk-test").await.unwrap());
    assert_eq!(
        backend.lifecycle("gk-test").await.unwrap(),
        Some(LifecyclePolicy::new(1, 1).unwrap())
    );
    assert_eq!(client.list_buckets().await.unwrap(), vec!["gk-test".to_string()]);
    assert_eq!(&client.read_file("gk-test", "/k", None).await.unwrap()[..], b"kept");
}

#[test_log::test(tokio::test)]
async fn bucket_name_rules() {
    let backend = Arc::new(MemoryBackend::new());
    let client = BlobClient::new(backend.clone(), Some(LifecyclePolicy::new(1, 1).unwrap()));

    let err = client.create_bucket("ab").await.unwrap_err();
    assert!(matches!(err, BlobError::Validation(_)), "{:?}", err);
    let err = client.create_bucket("a..b").await.unwrap_err();
    assert!(matches!(err, BlobError::Validation(_)), "{:?}", err);
    let err = client.create_bucket("").await.unwrap_err();
    assert!(matches!(err, BlobError::InvalidArgument(_)), "{:?}", err);
    assert!(client.list_buckets().await.unwrap().is_empty());

    client.create_bucket("valid-bucket1").await.unwrap();
    assert!(backend.bucket_exists("valid-bucket1").await.unwrap());
}

#[test_log::test(tokio::test)]
async fn delete_hides_object_but_keeps_history() {
    let (client, _) = client_with_bucket("gk-test").await;
    let v1 = client
        .write_file("gk-test", "/k", Some(Bytes::from_static(b"gone")))
        .await
        .unwrap()
        .unwrap();

    let marker = client.delete_file("gk-test", "/k").await.unwrap();
    assert!(marker.is_some());
    assert!(!client.file_exists("gk-test", "/k").await.unwrap());
    assert!(client.read_file("gk-test", "/k", None).await.unwrap_err().is_not_found());
    assert!(client.stat_file("gk-test", "/k").await.unwrap_err().is_not_found());
    assert_eq!(&client.read_file("gk-test", "/k", Some(&v1)).await.unwrap()[..], b"gone");

    client
        .write_file("gk-test", "/k", Some(Bytes::from_static(b"back")))
        .await
        .unwrap();
    assert_eq!(&client.read_file("gk-test", "/k", None).await.unwrap()[..], b"back");
}

#[test_log::test(tokio::test)]
async fn storage_outage_is_not_a_client_error() {
    let (client, backend) = client_with_bucket("gk-test").await;
    backend.set_unavailable(true);
    let err = client
        .write_file("gk-test", "/k", Some(Bytes::from_static(b"x")))
        .await
        .unwrap_err();
    assert!(matches!(err, BlobError::StorageUnavailable(_)), "{:?}", err);
    assert!(!err.is_client_error());
}
