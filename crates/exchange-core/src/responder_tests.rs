//! Tests for the responder loop.

use super::*;
use crate::processor::{ProcessedReply, SquareReply, SquareValueProcessor};
use bytes::Bytes;
use exchange_runtime::{
    Connector, CorrelationId, Endpoint, EndpointStatus, InMemoryBroker, MessageFormat,
};
use mockall::mock;

mock! {
    pub RequestProcessor {}
    impl RequestProcessor for RequestProcessor {
        fn process(&self, request: &ReceivedMessage) -> Result<ProcessedReply, ProcessingError>;
        fn name(&self) -> &str;
    }
}

fn name(value: &str) -> DestinationName {
    DestinationName::new(value.to_string()).unwrap()
}

fn source() -> DestinationName {
    name("DEV.QUEUE.1")
}

fn backout() -> DestinationName {
    name("DEV.QUEUE.BACKOUT")
}

fn reply_queue() -> DestinationName {
    name("REPLY.CLIENT")
}

fn request(value: i64) -> Message {
    Message::new(Bytes::from(format!("{{\"value\": {}}}", value)))
        .with_format(MessageFormat::Json)
        .with_reply_to(reply_queue())
}

fn failing_processor() -> Arc<dyn RequestProcessor> {
    let mut processor = MockRequestProcessor::new();
    processor.expect_name().return_const("failing".to_string());
    processor.expect_process().returning(|_| {
        Err(ProcessingError::Failed {
            message: "downstream unavailable".to_string(),
        })
    });
    Arc::new(processor)
}

struct Harness {
    broker: InMemoryBroker,
    endpoint: Endpoint,
    responder: Responder,
}

impl Harness {
    async fn new(processor: Arc<dyn RequestProcessor>, threshold: u32) -> Self {
        let endpoint = Endpoint::default();
        let broker = InMemoryBroker::default().with_endpoint(&endpoint, EndpointStatus::Available);
        broker.declare_queue(&endpoint, &source());
        broker.declare_queue(&endpoint, &backout());

        let settings = ResponderSettings::new(source(), backout())
            .with_receive_wait(Duration::from_millis(100))
            .with_policy(QuarantinePolicy::new(threshold));
        let connection = broker.connect(&endpoint).await.unwrap();
        let responder = Responder::open(connection, processor, settings).await.unwrap();

        Self {
            broker,
            endpoint,
            responder,
        }
    }

    fn enqueue(&self, message: Message) -> MessageId {
        self.broker.enqueue(&self.endpoint, &source(), message).unwrap()
    }

    fn enqueue_redelivered(&self, message: Message, count: u32) -> MessageId {
        self.broker
            .enqueue_redelivered(&self.endpoint, &source(), message, count)
            .unwrap()
    }

    fn depth(&self, queue: &DestinationName) -> usize {
        self.broker.queue_depth(&self.endpoint, queue)
    }

    fn drain(&self, queue: &DestinationName) -> Vec<ReceivedMessage> {
        self.broker.drain(&self.endpoint, queue)
    }
}

// ============================================================================
// Successful cycles
// ============================================================================

mod replying {
    use super::*;

    #[tokio::test]
    async fn test_reply_echoes_correlation_id_and_commits() {
        let harness = Harness::new(Arc::new(SquareValueProcessor), 5).await;
        let correlation_id = CorrelationId::generate();
        let request_id = harness.enqueue(request(7).with_correlation_id(correlation_id.clone()));

        let outcome = harness.responder.run_cycle().await.unwrap();

        match outcome {
            CycleOutcome::Replied { request_id: id, .. } => assert_eq!(id, request_id),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(harness.depth(&source()), 0);

        let replies = harness.drain(&reply_queue());
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].correlation_id, Some(correlation_id));

        let body: SquareReply = serde_json::from_slice(&replies[0].body).unwrap();
        assert_eq!(body.value, 49);
        assert!(body.greeting.starts_with("Reply from square at "));
    }

    #[tokio::test]
    async fn test_request_without_correlation_id_gets_message_id_echoed() {
        let harness = Harness::new(Arc::new(SquareValueProcessor), 5).await;
        let request_id = harness.enqueue(request(3));

        harness.responder.run_cycle().await.unwrap();

        let replies = harness.drain(&reply_queue());
        assert_eq!(
            replies[0].correlation_id,
            Some(CorrelationId::from(&request_id))
        );
    }

    #[tokio::test]
    async fn test_processor_properties_are_carried_on_reply() {
        let mut processor = MockRequestProcessor::new();
        processor.expect_name().return_const("tagging".to_string());
        processor.expect_process().times(1).returning(|request| {
            Ok(ProcessedReply::new(request.body.clone(), MessageFormat::Text)
                .with_property("handled_by".to_string(), "tagging".to_string()))
        });
        let harness = Harness::new(Arc::new(processor), 5).await;
        harness.enqueue(request(1));

        harness.responder.run_cycle().await.unwrap();

        let replies = harness.drain(&reply_queue());
        assert_eq!(replies[0].format, MessageFormat::Text);
        assert_eq!(
            replies[0].properties.get("handled_by").map(String::as_str),
            Some("tagging")
        );
    }

    #[tokio::test]
    async fn test_stats_count_replies() {
        let harness = Harness::new(Arc::new(SquareValueProcessor), 5).await;
        harness.enqueue(request(2));
        harness.enqueue(request(3));

        harness.responder.run_cycle().await.unwrap();
        harness.responder.run_cycle().await.unwrap();

        let stats = harness.responder.stats().snapshot();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.replied, 2);
        assert_eq!(stats.rolled_back, 0);
    }
}

// ============================================================================
// Failures and quarantine
// ============================================================================

mod quarantine {
    use super::*;

    #[tokio::test]
    async fn test_failure_below_threshold_rolls_back() {
        let harness = Harness::new(failing_processor(), 5).await;
        let request_id = harness.enqueue_redelivered(request(1), 4);

        let outcome = harness.responder.run_cycle().await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::RolledBack {
                message_id: Some(request_id.clone()),
                redelivery_count: 4,
            }
        );
        let remaining = harness.drain(&source());
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message_id, request_id);
        assert_eq!(remaining[0].redelivery_count, 5);
        assert_eq!(harness.depth(&backout()), 0);
    }

    #[tokio::test]
    async fn test_failure_at_threshold_diverts_and_commits() {
        let harness = Harness::new(failing_processor(), 5).await;
        let request_id = harness.enqueue_redelivered(request(1), 5);

        let outcome = harness.responder.run_cycle().await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Diverted {
                message_id: request_id,
                archived: true,
            }
        );
        assert_eq!(harness.depth(&source()), 0);
        assert_eq!(harness.depth(&reply_queue()), 0);

        let diverted = harness.drain(&backout());
        assert_eq!(diverted.len(), 1);
        assert_eq!(diverted[0].body, request(1).body);
        assert_eq!(diverted[0].reply_to, Some(reply_queue()));
        assert_eq!(
            diverted[0]
                .properties
                .get(BACKOUT_REDELIVERY_COUNT_PROPERTY)
                .map(String::as_str),
            Some("5")
        );
        assert!(diverted[0]
            .properties
            .get(BACKOUT_REASON_PROPERTY)
            .is_some_and(|reason| reason.contains("downstream unavailable")));
    }

    #[tokio::test]
    async fn test_repeated_failures_divert_on_fifth_redelivery() {
        let harness = Harness::new(failing_processor(), 5).await;
        harness.enqueue(request(1));

        for expected in 0..5 {
            let outcome = harness.responder.run_cycle().await.unwrap();
            assert!(
                matches!(outcome, CycleOutcome::RolledBack { redelivery_count, .. } if redelivery_count == expected),
                "cycle {expected}: {outcome:?}"
            );
        }

        let outcome = harness.responder.run_cycle().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Diverted { archived: true, .. }));

        let stats = harness.responder.stats().snapshot();
        assert_eq!(stats.rolled_back, 5);
        assert_eq!(stats.diverted, 1);
        assert_eq!(harness.depth(&source()), 0);
    }

    #[tokio::test]
    async fn test_threshold_zero_diverts_first_failure() {
        let harness = Harness::new(failing_processor(), 0).await;
        harness.enqueue(request(1));

        let outcome = harness.responder.run_cycle().await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Diverted { archived: true, .. }));
    }

    #[tokio::test]
    async fn test_failed_diversion_still_commits() {
        let harness = Harness::new(failing_processor(), 5).await;
        harness
            .broker
            .fail_sends_to(&harness.endpoint, &backout(), "MQRC_Q_FULL");
        harness.enqueue_redelivered(request(1), 5);

        let outcome = harness.responder.run_cycle().await.unwrap();

        assert!(matches!(
            outcome,
            CycleOutcome::Diverted { archived: false, .. }
        ));
        assert_eq!(harness.depth(&source()), 0);
        assert_eq!(harness.depth(&backout()), 0);
        assert_eq!(harness.responder.stats().snapshot().diversion_failures, 1);
    }

    #[tokio::test]
    async fn test_missing_reply_to_is_a_failure() {
        let mut processor = MockRequestProcessor::new();
        processor.expect_name().return_const("unused".to_string());
        processor.expect_process().never();
        let harness = Harness::new(Arc::new(processor), 5).await;
        harness.enqueue(Message::new(Bytes::from_static(b"{\"value\": 1}")));

        let outcome = harness.responder.run_cycle().await.unwrap();

        assert!(matches!(
            outcome,
            CycleOutcome::RolledBack {
                redelivery_count: 0,
                ..
            }
        ));
        assert_eq!(harness.drain(&source())[0].redelivery_count, 1);
    }

    #[tokio::test]
    async fn test_reply_send_failure_rolls_back_without_publishing() {
        let harness = Harness::new(Arc::new(SquareValueProcessor), 5).await;
        harness
            .broker
            .fail_sends_to(&harness.endpoint, &reply_queue(), "MQRC_PUT_INHIBITED");
        harness.enqueue(request(4));

        let outcome = harness.responder.run_cycle().await.unwrap();

        assert!(matches!(outcome, CycleOutcome::RolledBack { .. }));
        assert_eq!(harness.depth(&reply_queue()), 0);
        assert_eq!(harness.depth(&source()), 1);
    }

    #[tokio::test]
    async fn test_invalid_payload_rolls_back() {
        let harness = Harness::new(Arc::new(SquareValueProcessor), 5).await;
        harness.enqueue(
            Message::new(Bytes::from_static(b"not json")).with_reply_to(reply_queue()),
        );

        let outcome = harness.responder.run_cycle().await.unwrap();

        assert!(matches!(outcome, CycleOutcome::RolledBack { .. }));
        assert_eq!(harness.depth(&reply_queue()), 0);
    }

    #[tokio::test]
    async fn test_receive_failure_rolls_back_without_message() {
        let harness = Harness::new(failing_processor(), 0).await;
        harness.broker.delete_queue(&harness.endpoint, &source());

        let outcome = harness.responder.run_cycle().await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::RolledBack {
                message_id: None,
                redelivery_count: 0,
            }
        );
        assert_eq!(harness.responder.stats().snapshot().receive_failures, 1);
    }
}

// ============================================================================
// Idle handling and the loop
// ============================================================================

mod looping {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_idle_cycles_never_touch_quarantine() {
        let mut processor = MockRequestProcessor::new();
        processor.expect_name().return_const("unused".to_string());
        processor.expect_process().never();
        let harness = Harness::new(Arc::new(processor), 0).await;

        for _ in 0..10 {
            assert_eq!(
                harness.responder.run_cycle().await.unwrap(),
                CycleOutcome::Idle
            );
        }

        let stats = harness.responder.stats().snapshot();
        assert_eq!(stats.idle_ticks, 10);
        assert_eq!(stats.rolled_back, 0);
        assert_eq!(stats.diverted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_when_idle_if_configured() {
        let endpoint = Endpoint::default();
        let broker = InMemoryBroker::default().with_endpoint(&endpoint, EndpointStatus::Available);
        for value in 1..=3 {
            broker.enqueue(&endpoint, &source(), request(value)).unwrap();
        }

        let settings = ResponderSettings::new(source(), backout()).with_exit_when_idle(true);
        let connection = broker.connect(&endpoint).await.unwrap();
        let responder = Responder::open(connection, Arc::new(SquareValueProcessor), settings)
            .await
            .unwrap();

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = responder.run(shutdown_rx).await.unwrap();

        assert_eq!(stats.replied, 3);
        assert_eq!(stats.idle_ticks, 1);
        assert_eq!(broker.queue_depth(&endpoint, &reply_queue()), 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_before_receiving() {
        let harness = Harness::new(Arc::new(SquareValueProcessor), 5).await;
        harness.enqueue(request(2));

        let (_shutdown_tx, shutdown_rx) = watch::channel(true);
        let stats = harness.responder.run(shutdown_rx).await.unwrap();

        assert_eq!(stats.received, 0);
        assert_eq!(harness.depth(&source()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_signal_stops_running_loop() {
        let harness = Harness::new(Arc::new(SquareValueProcessor), 5).await;
        let responder = Arc::new(harness.responder);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = {
            let responder = Arc::clone(&responder);
            tokio::spawn(async move { responder.run(shutdown_rx).await })
        };

        harness
            .broker
            .enqueue(&harness.endpoint, &source(), request(5))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        shutdown_tx.send(true).unwrap();

        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.replied, 1);
        assert_eq!(
            harness.broker.queue_depth(&harness.endpoint, &reply_queue()),
            1
        );
    }

    /// Responder whose source queue has been deleted, so every receive fails
    async fn broken_source_responder(pause: Duration) -> (InMemoryBroker, Arc<Responder>) {
        let endpoint = Endpoint::default();
        let broker = InMemoryBroker::default().with_endpoint(&endpoint, EndpointStatus::Available);
        let settings = ResponderSettings::new(source(), backout())
            .with_receive_wait(Duration::from_millis(100))
            .with_receive_failure_pause(pause);
        let connection = broker.connect(&endpoint).await.unwrap();
        let responder = Responder::open(connection, Arc::new(SquareValueProcessor), settings)
            .await
            .unwrap();
        broker.delete_queue(&endpoint, &source());
        (broker, Arc::new(responder))
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_failures_wait_out_the_failure_pause() {
        let (_broker, responder) = broken_source_responder(Duration::from_secs(1)).await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = {
            let responder = Arc::clone(&responder);
            tokio::spawn(async move { responder.run(shutdown_rx).await })
        };

        tokio::time::sleep(Duration::from_millis(3500)).await;
        shutdown_tx.send(true).unwrap();

        let stats = task.await.unwrap().unwrap();
        // Failures at 0s, 1s, 2s and 3s; the receive wait plays no part
        assert_eq!(stats.receive_failures, 4);
    }

    #[tokio::test]
    async fn test_zero_failure_pause_retries_at_once() {
        let (_broker, responder) = broken_source_responder(Duration::ZERO).await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = {
            let responder = Arc::clone(&responder);
            tokio::spawn(async move { responder.run(shutdown_rx).await })
        };

        let retried = tokio::time::timeout(Duration::from_secs(5), async {
            while responder.stats().snapshot().receive_failures < 50 {
                tokio::task::yield_now().await;
            }
        })
        .await;
        shutdown_tx.send(true).unwrap();

        assert!(retried.is_ok(), "receive failures were not retried at once");
        let stats = task.await.unwrap().unwrap();
        assert!(stats.receive_failures >= 50);
        assert_eq!(stats.replied, 0);
    }

    #[test]
    fn test_settings_from_config_carry_failure_pause() {
        let mut config = crate::config::ExchangeConfig::default();
        config.responder.receive_failure_pause_millis = 0;

        let settings = ResponderSettings::from_config(&config.destinations, &config.responder);

        assert_eq!(settings.receive_failure_pause, Duration::ZERO);
        assert_eq!(settings.receive_wait, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_exclusive_source_rejects_second_reader() {
        let endpoint = Endpoint::default();
        let broker = InMemoryBroker::default().with_endpoint(&endpoint, EndpointStatus::Available);
        let mut settings = ResponderSettings::new(source(), backout());
        settings.exclusive = true;

        let first = Responder::open(
            broker.connect(&endpoint).await.unwrap(),
            Arc::new(SquareValueProcessor),
            settings.clone(),
        )
        .await
        .unwrap();
        let second = Responder::open(
            broker.connect(&endpoint).await.unwrap(),
            Arc::new(SquareValueProcessor),
            settings.clone(),
        )
        .await;
        assert!(matches!(second, Err(ResponderError::Open { .. })));

        first.close().await.unwrap();
        let third = Responder::open(
            broker.connect(&endpoint).await.unwrap(),
            Arc::new(SquareValueProcessor),
            settings,
        )
        .await;
        assert!(third.is_ok());
    }
}
