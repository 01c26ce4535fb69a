//! End-to-end propagation behaviour across all five stages.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use trace_relay::envelope::{Envelope, Stage, StageResult};
use trace_relay::pipeline::LocalPipeline;
use trace_relay::propagation::{Carrier, TraceOrigin, TRACEPARENT};
use trace_relay::stages::{
    ComputeStage, InvocationContext, QueueRelayStage, StageError, StageWork, StepAStage,
    StepBStage,
};
use trace_relay::transport::{
    MemoryJobQueue, MessageAttribute, MessageAttributes, QueueMessage, TransportError,
    ATTR_TRACE_CARRIER, JOB_DATA_PARAM,
};

#[tokio::test(start_paused = true)]
async fn test_fresh_request_links_every_hop() {
    let config = common::test_config();
    let (tracer, exporter) = common::capturing_tracer("pipeline");
    let pipeline = LocalPipeline::new(&config, tracer, StageWork::simulated(&config.work));

    let run = pipeline.run(common::post(r#"{"message":"hi"}"#)).await.unwrap();

    // Ingress originated the trace.
    let ingress_hop = run.hop(Stage::Ingress).unwrap();
    let origin = ingress_hop.ingress_result().unwrap();
    assert_eq!(origin.trace_id, run.ack.trace_id);
    assert_eq!(ingress_hop.parent_trace_id.as_deref(), Some(origin.trace_id.as_str()));

    // Each handed-off envelope names the handing-off stage as parent.
    for (stage, envelope) in &run.hops[..4] {
        let own = envelope.result(*stage).unwrap();
        assert_eq!(envelope.parent_trace_id.as_deref(), Some(own.trace_id()));
        assert_eq!(envelope.parent_span_id.as_deref(), Some(own.span_id()));
    }

    let done = run.final_envelope().unwrap();
    assert_eq!(done.passthrough()["message"], "hi");
    assert_eq!(done.final_status(), Some("completed"));

    let chain = done.recorded_trace_chain().unwrap();
    let stages: Vec<Stage> = chain.iter().map(|link| link.stage).collect();
    assert_eq!(stages, Stage::ALL.to_vec());
    for link in chain {
        assert_eq!(link.trace_id, origin.trace_id);
    }

    // Every stage has its own span, parented on the previous stage's span.
    let mut span_ids: Vec<&str> = chain.iter().map(|link| link.span_id.as_str()).collect();
    span_ids.sort_unstable();
    span_ids.dedup();
    assert_eq!(span_ids.len(), 5);

    let spans = exporter.spans();
    assert_eq!(spans.len(), 5);
    for pair in chain.windows(2) {
        let child = spans.iter().find(|s| s.span_id == pair[1].span_id).unwrap();
        assert_eq!(child.parent_span_id.as_deref(), Some(pair[0].span_id.as_str()));
    }
    let root = spans.iter().find(|s| s.stage == Stage::Ingress).unwrap();
    assert_eq!(root.parent_span_id, None);
}

#[tokio::test(start_paused = true)]
async fn test_result_slots_only_grow() {
    let config = common::test_config();
    let (tracer, _) = common::capturing_tracer("pipeline");
    let pipeline = LocalPipeline::new(&config, tracer, StageWork::simulated(&config.work));

    let run = pipeline
        .run(common::post(r#"{"message":"hi","customer":{"id":42}}"#))
        .await
        .unwrap();

    let mut previous: Option<&Envelope> = None;
    for (stage, envelope) in &run.hops {
        let recorded = envelope.recorded_stages();
        assert_eq!(recorded.last(), Some(stage));
        if let Some(previous) = previous {
            envelope.verify_extends(previous).unwrap();
            assert_eq!(recorded.len(), previous.recorded_stages().len() + 1);
        }
        assert_eq!(envelope.passthrough()["customer"]["id"], 42);
        previous = Some(envelope);
    }
}

#[tokio::test]
async fn test_relay_falls_back_to_attribute_carrier() {
    let config = common::test_config();
    let (tracer, exporter) = common::capturing_tracer("queue-relay");
    let jobs = MemoryJobQueue::new();
    let relay = QueueRelayStage::new(&config, tracer.clone(), Arc::new(jobs.clone()));

    let upstream = tracer.continue_or_start(Stage::Ingress, None);
    let mut attributes = MessageAttributes::new();
    attributes.insert(
        ATTR_TRACE_CARRIER.to_string(),
        MessageAttribute::string(tracer.insert_carrier(&upstream).to_json()),
    );
    let message = QueueMessage {
        message_id: "m-1".to_string(),
        body: r#"{"message":"no carrier here"}"#.to_string(),
        attributes,
    };

    relay
        .relay(message, &InvocationContext::generate("queue-relay"))
        .await
        .unwrap();

    let job = jobs.jobs().pop().unwrap();
    let envelope = Envelope::parse(&job.submission.parameters[JOB_DATA_PARAM]).unwrap();
    let result = envelope.queue_relay_result().unwrap();
    assert_eq!(result.trace_id, upstream.trace_id().to_string());

    let span = exporter
        .spans()
        .into_iter()
        .find(|s| s.span_id == result.span_id)
        .unwrap();
    assert_eq!(span.parent_span_id, Some(upstream.span_id().to_string()));
    assert_eq!(
        exporter.attributes_for(&result.span_id)[0].get_str("trace.carrier_source"),
        Some("message_attributes")
    );
}

#[tokio::test(start_paused = true)]
async fn test_workflow_start_timeout_is_recorded_once() {
    let config = common::test_config();
    let (tracer, exporter) = common::capturing_tracer("compute-job");
    let work = StageWork::simulated(&config.work);
    let compute = ComputeStage::new(
        &config,
        tracer,
        Arc::new(common::PendingWorkflows),
        work.compute,
    );

    let err = compute
        .handle(&BTreeMap::new(), &InvocationContext::new("job-1", "trace-job-1"))
        .await
        .unwrap_err();

    match err {
        StageError::Transport(TransportError::Timeout { operation, .. }) => {
            assert_eq!(operation, "start_execution");
        }
        other => panic!("expected a transport timeout, got {:?}", other),
    }

    let errors = exporter.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].stage, Stage::Compute);
    assert!(errors[0].message.contains("timed out"));

    let spans = exporter.spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(errors[0].span_id, spans[0].span_id);
    assert_eq!(errors[0].trace_id, spans[0].trace_id);
}

#[tokio::test(start_paused = true)]
async fn test_total_processing_time_sums_workflow_steps() {
    let config = common::test_config();
    let (tracer, _) = common::capturing_tracer("workflow");
    let work = StageWork::simulated(&config.work);
    let step_a = StepAStage::new(tracer.clone(), work.step_a);
    let step_b = StepBStage::new(tracer, work.step_b);
    let ctx = InvocationContext::new("arn:execution:1", "execution-1");

    let after_a = step_a
        .handle(serde_json::json!({ "message": "hi" }), &ctx)
        .await
        .unwrap();
    assert_eq!(after_a.step_a_result().unwrap().processing_time, 100);

    let done = step_b
        .handle(after_a.to_value().unwrap(), &ctx)
        .await
        .unwrap();
    assert_eq!(done.step_b_result().unwrap().processing_time, 200);
    assert_eq!(done.recorded_total_processing_time(), Some(300));
}

#[tokio::test]
async fn test_repeated_carriers_continue_same_trace() {
    let (tracer, _) = common::capturing_tracer("ingress");
    let active = tracer.continue_or_start(Stage::Ingress, None);

    let first = tracer.insert_carrier(&active);
    let second = tracer.insert_carrier(&active);
    assert_eq!(first, second);

    for carrier in [first, second] {
        let next = tracer.continue_or_start(Stage::QueueRelay, Some(&carrier));
        assert_eq!(next.trace_id(), active.trace_id());
        assert_ne!(next.span_id(), active.span_id());
        assert_eq!(next.origin(), &TraceOrigin::Continued);
    }
}

#[tokio::test(start_paused = true)]
async fn test_malformed_carrier_never_blocks_the_stage() {
    let (tracer, exporter) = common::capturing_tracer("workflow-step-a");
    let mut bad = Carrier::new();
    bad.insert(TRACEPARENT, "00-not-a-trace-01");

    let recovered = tracer.continue_or_start(Stage::StepA, Some(&bad));
    assert!(matches!(recovered.origin(), TraceOrigin::Recovered { .. }));
    assert!(recovered.parent().is_none());

    // The same carrier embedded in a state input still lets the step complete.
    let config = common::test_config();
    let step_a = StepAStage::new(tracer, StageWork::simulated(&config.work).step_a);
    let input = serde_json::json!({
        "message": "hi",
        "propagationCarrier": { "traceparent": "00-not-a-trace-01" },
    });
    let out = step_a
        .handle(input, &InvocationContext::generate("execution-1"))
        .await
        .unwrap();

    assert!(out.step_a_result().is_some());
    assert!(exporter.errors().is_empty());
}
