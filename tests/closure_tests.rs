//! Closure registry tests: the remote application law and error
//! conversion at the worker boundary.

use std::sync::Arc;

use remora::closure::{ClosureRegistry, RemoteFn};

fn square_registry() -> (Arc<ClosureRegistry>, RemoteFn<i64, i64>) {
    let mut registry = ClosureRegistry::new();
    let square = registry.register("square", |x: i64| async move { Ok(x * x) });
    (registry.freeze(), square)
}

/// Running an applied remote function through the registry produces the
/// value the function would produce locally.
#[tokio::test]
async fn remote_application_matches_local_application() {
    let (registry, square) = square_registry();

    for x in [-3i64, 0, 7, 1 << 20] {
        let process = square.apply(x);
        let closure = process.force().await.unwrap().clone();
        let encoded = registry.invoke(closure).await.unwrap();
        let remote = process.decode(&encoded).unwrap();
        assert_eq!(remote, x * x);
    }
}

#[tokio::test]
async fn error_strings_travel_the_err_branch() {
    let mut registry = ClosureRegistry::new();
    let failing: RemoteFn<i64, i64> =
        registry.register("failing", |x: i64| async move { Err(format!("refused {x}")) });
    let registry = registry.freeze();

    let process = failing.apply(13);
    let closure = process.force().await.unwrap().clone();
    let err = registry.invoke(closure).await.unwrap_err();
    assert_eq!(err, "refused 13");
}

#[tokio::test]
async fn structured_arguments_round_trip() {
    #[derive(serde::Serialize, serde::Deserialize)]
    struct Sum {
        terms: Vec<i64>,
    }

    let mut registry = ClosureRegistry::new();
    let sum: RemoteFn<Sum, i64> =
        registry.register("sum", |arg: Sum| async move { Ok(arg.terms.iter().sum()) });
    let registry = registry.freeze();

    let process = sum.apply(Sum {
        terms: vec![1, 2, 3, 4],
    });
    let closure = process.force().await.unwrap().clone();
    let encoded = registry.invoke(closure).await.unwrap();
    assert_eq!(process.decode(&encoded).unwrap(), 10);
}
