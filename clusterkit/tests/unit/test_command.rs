//! Command pipeline tests

use std::time::Duration;

use clusterkit::command::{CommandRunner, CommandSpec, ProcessRunner, RemoteEndpoint, RunOptions};
use clusterkit::errors::ClusterError;
use tokio_test::{assert_err, assert_ok};

#[test]
fn test_pipe_concatenates_stages() {
    let a = CommandSpec::from_shell("cat data.csv | grep x").unwrap();
    let b = CommandSpec::from_shell("sort | uniq -c | head -n 3").unwrap();
    let piped = &a | &b;
    assert_eq!(piped.len(), a.len() + b.len());
    assert_eq!(piped.stages()[..2], a.stages()[..]);
    assert_eq!(piped.stages()[2..], b.stages()[..]);
    assert_eq!(piped.to_string(), format!("{a} | {b}"));
}

#[test]
fn test_empty_commands_rejected() {
    assert!(matches!(
        CommandSpec::from_args(Vec::<String>::new()),
        Err(ClusterError::InvariantViolation(_))
    ));
    assert_err!(CommandSpec::from_stages(vec![vec!["ls".to_string()], vec![]]));
    assert_err!(CommandSpec::from_shell(""));
}

#[test]
fn test_on_host_wraps_once() {
    let spec = CommandSpec::from_shell("printf a | tr a b").unwrap();
    assert_eq!(spec.on_host(&RemoteEndpoint::localhost()), spec);

    let endpoint = RemoteEndpoint::new("198.51.100.4", "demouser", "/keys/demo.key")
        .with_port(2200)
        .with_cipher("chacha20-poly1305@openssh.com");
    let wrapped = spec.on_host(&endpoint);
    assert_eq!(wrapped.len(), 1);
    let args = &wrapped.stages()[0];
    assert_eq!(args[0], "ssh");
    assert!(args.windows(2).any(|w| w[0] == "-p" && w[1] == "2200"));
    assert!(args.windows(2).any(|w| w[0] == "-c" && w[1] == "chacha20-poly1305@openssh.com"));
    assert!(args.windows(2).any(|w| w[0] == "-i" && w[1] == "/keys/demo.key"));
    assert!(args.contains(&"demouser@198.51.100.4".to_string()));
}

#[test]
fn test_remote_copy_arguments() {
    let endpoint = RemoteEndpoint::new("198.51.100.4", "root", "/keys/demo.key");
    let spec = CommandSpec::remote_copy(&["a.sh", "b.sh"], "~/", &endpoint).unwrap();
    let args = &spec.stages()[0];
    assert_eq!(args[0], "scp");
    assert!(args.windows(2).any(|w| w[0] == "-P" && w[1] == "22"));
    assert_eq!(&args[args.len() - 3..], ["a.sh", "b.sh", "root@198.51.100.4:~/"]);

    assert_err!(CommandSpec::remote_copy::<&str>(&[], "~/", &endpoint));
    assert_err!(CommandSpec::remote_copy(&["a.sh"], "", &endpoint));
}

#[cfg(unix)]
mod process {
    use super::*;

    fn options() -> RunOptions {
        RunOptions::default().detached_stdin()
    }

    #[tokio::test]
    async fn test_printf_tr() {
        let spec = CommandSpec::from_shell("printf a | tr a b").unwrap();
        let output = assert_ok!(ProcessRunner.run(&spec, &options()).await);
        assert_eq!(output.stdout(), ["", "b"]);
        assert_eq!(output.status(), [0, 0]);
    }

    #[tokio::test]
    async fn test_result_per_stage_in_order() {
        let spec = CommandSpec::from_shell("printf 'x\\ny\\n' | sort -r | head -n 1 | tr y z").unwrap();
        let output = ProcessRunner.run(&spec, &options()).await.unwrap();
        assert_eq!(output.stdout().len(), 4);
        assert_eq!(output.stderr().len(), 4);
        assert_eq!(output.status(), [0, 0, 0, 0]);
        assert_eq!(output.stdout()[3], "z\n");
    }

    #[tokio::test]
    async fn test_strict_and_diagnostic_modes() {
        let spec = CommandSpec::from_shell("sh -c 'echo oops >&2; exit 4'").unwrap();

        let output = ProcessRunner.run(&spec, &options()).await.unwrap();
        assert!(!output.success());
        assert_eq!(output.status(), [4]);
        assert_eq!(output.stderr()[0], "oops\n");

        match ProcessRunner.run_strict(&spec, &options()).await {
            Err(ClusterError::CommandFailed(failure)) => {
                assert_eq!(failure.status, vec![4]);
                assert!(failure.to_string().contains("oops"));
                assert!(failure.command.contains("exit 4"));
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_overall_timeout_kills_pipeline() {
        let spec = CommandSpec::from_shell("sleep 5 | cat").unwrap();
        let options = RunOptions::with_timeout(Duration::from_millis(100)).detached_stdin();
        let started = std::time::Instant::now();
        let output = ProcessRunner.run(&spec, &options).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(output.timed_out());
        assert!(!output.success());
    }
}
