mod common;

use camgraph::capture::{CameraConfiguration, Fault, PixelFormat, Size, VirtualDeviceOptions};
use camgraph::media::DeviceMatch;
use camgraph::pipeline::{CameraState, RequestStatus};
use camgraph::Error;
use common::{config, finished, request, Rig};

#[test]
fn configure_stores_hardware_values() {
    let mut rig = Rig::vimc(1);
    let camera = rig.camera();
    assert_eq!(rig.manager.state(&camera), Some(CameraState::Unconfigured));

    let stream = rig.configure(&camera, 4);

    let stored = rig.manager.stream_configuration(&camera, stream).unwrap();
    assert_eq!(stored.size, Size::new(640, 480));
    assert_eq!(stored.pixel_format, PixelFormat::Rgb24);
    assert_eq!(stored.buffer_count, 4);
    assert_eq!(rig.node(0).format().size, Size::new(640, 480));
    assert_eq!(rig.manager.state(&camera), Some(CameraState::Configured));
}

#[test]
fn divergent_size_is_rejected() {
    let mut rig = Rig::vimc(1);
    let camera = rig.camera();
    let stream = camera.streams[0];
    let mut requested = CameraConfiguration::new();
    requested.insert(stream, config(PixelFormat::Rgb24, 641, 480, 4));

    let err = rig.manager.configure(&camera, &requested).unwrap_err();

    match err {
        Error::Invalid { applied, .. } => assert_eq!(applied.size, Size::new(640, 480)),
        other => panic!("expected Invalid, got {other:?}"),
    }
    assert!(rig.manager.stream_configuration(&camera, stream).is_none());
    assert_eq!(rig.manager.state(&camera), Some(CameraState::Unconfigured));
}

#[test]
fn unsupported_format_is_rejected() {
    let mut rig = Rig::vimc(1);
    let camera = rig.camera();
    let mut requested = CameraConfiguration::new();
    requested.insert(camera.streams[0], config(PixelFormat::Nv12, 640, 480, 4));

    let err = rig.manager.configure(&camera, &requested).unwrap_err();
    assert!(matches!(err, Error::Invalid { .. }));
}

#[test]
fn zero_buffers_and_empty_configuration_are_invalid() {
    let mut rig = Rig::vimc(1);
    let camera = rig.camera();

    let err = rig.manager.configure(&camera, &CameraConfiguration::new()).unwrap_err();
    assert!(matches!(err, Error::InvalidConfiguration(_)));

    let mut requested = CameraConfiguration::new();
    requested.insert(camera.streams[0], config(PixelFormat::Rgb24, 640, 480, 0));
    let err = rig.manager.configure(&camera, &requested).unwrap_err();
    assert!(matches!(err, Error::InvalidConfiguration(_)));
}

#[test]
fn pool_follows_allocate_and_free() {
    let mut rig = Rig::vimc(1);
    let camera = rig.camera();
    let stream = rig.configure(&camera, 4);

    rig.manager.allocate_buffers(&camera, &[stream]).unwrap();
    assert_eq!(rig.manager.pool_len(&camera, stream), Some(4));
    assert_eq!(rig.node(0).exported(), 4);
    assert_eq!(rig.manager.state(&camera), Some(CameraState::Allocated));

    let err = rig.manager.allocate_buffers(&camera, &[stream]).unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));

    rig.manager.free_buffers(&camera, &[stream]).unwrap();
    assert_eq!(rig.manager.pool_len(&camera, stream), Some(0));
    assert_eq!(rig.node(0).exported(), 0);
    assert_eq!(rig.manager.state(&camera), Some(CameraState::Configured));
}

#[test]
fn allocating_no_streams_is_invalid() {
    let mut rig = Rig::vimc(1);
    let camera = rig.camera();
    let stream = rig.configure(&camera, 4);

    let err = rig.manager.allocate_buffers(&camera, &[]).unwrap_err();

    assert!(matches!(err, Error::InvalidConfiguration(_)));
    assert_eq!(rig.manager.state(&camera), Some(CameraState::Configured));
    assert_eq!(rig.manager.pool_len(&camera, stream), Some(0));
}

#[test]
fn lifecycle_order_is_enforced() {
    let mut rig = Rig::vimc(1);
    let camera = rig.camera();
    let stream = camera.streams[0];

    let err = rig.manager.allocate_buffers(&camera, &[stream]).unwrap_err();
    assert!(matches!(err, Error::InvalidState { state: CameraState::Unconfigured, .. }));
    let err = rig.manager.start(&camera).unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));

    rig.configure(&camera, 2);
    let err = rig
        .manager
        .queue_request(&camera, request(&[(stream, 0)], 1))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));

    rig.manager.allocate_buffers(&camera, &[stream]).unwrap();
    rig.manager.start(&camera).unwrap();
    let err = rig.manager.free_buffers(&camera, &[stream]).unwrap_err();
    assert!(matches!(err, Error::InvalidState { state: CameraState::Streaming, .. }));
    let err = rig.manager.configure(&camera, &CameraConfiguration::new()).unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
}

#[test]
fn foreign_stream_is_rejected() {
    let mut rig = Rig::vimc(2);
    let first = rig.cameras[0].clone();
    let second = rig.cameras[1].clone();
    let stream = rig.streaming(&first, 4);
    let foreign = rig.configure(&second, 4);
    rig.queue(&first, stream, 1, 0);

    let err = rig
        .manager
        .queue_request(&first, request(&[(foreign, 0)], 2))
        .unwrap_err();

    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(rig.manager.in_flight(&first), Some(1));
    assert_eq!(rig.node(0).queued(), 1);
}

#[test]
fn buffer_already_in_flight_is_rejected() {
    let mut rig = Rig::vimc(1);
    let camera = rig.camera();
    let stream = rig.streaming(&camera, 2);
    rig.queue(&camera, stream, 1, 0);

    let err = rig
        .manager
        .queue_request(&camera, request(&[(stream, 0)], 2))
        .unwrap_err();
    assert!(matches!(err, Error::ProtocolViolation(_)));

    let err = rig
        .manager
        .queue_request(&camera, request(&[(stream, 7)], 3))
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(rig.manager.in_flight(&camera), Some(1));
}

#[test]
fn stop_then_start_leaves_no_stale_requests() {
    let mut rig = Rig::vimc(1);
    let camera = rig.camera();
    let stream = rig.streaming(&camera, 4);
    for index in 0..4 {
        rig.queue(&camera, stream, index as u64, index);
    }
    // Two frames land before the stop but are not yet dispatched
    rig.node(0).complete_next();
    rig.node(0).complete_next();

    rig.manager.stop(&camera).unwrap();

    let done = finished(&rig.drain());
    assert_eq!(
        done,
        [
            (0, RequestStatus::Complete),
            (1, RequestStatus::Complete),
            (2, RequestStatus::Cancelled),
            (3, RequestStatus::Cancelled),
        ]
    );
    assert_eq!(rig.manager.in_flight(&camera), Some(0));
    assert_eq!(rig.manager.state(&camera), Some(CameraState::Allocated));

    rig.manager.start(&camera).unwrap();
    rig.queue(&camera, stream, 10, 2);
    rig.node(0).complete_next();
    assert_eq!(rig.manager.dispatch_pending(), 1);
    assert_eq!(finished(&rig.drain()), [(10, RequestStatus::Complete)]);
}

#[test]
fn stop_fault_still_ends_allocated() {
    let mut rig = Rig::vimc(1);
    let camera = rig.camera();
    let stream = rig.streaming(&camera, 2);
    rig.queue(&camera, stream, 1, 0);
    rig.node(0).inject(Fault::StreamOff);

    let err = rig.manager.stop(&camera).unwrap_err();

    assert!(matches!(err, Error::Device { .. }));
    assert_eq!(rig.manager.state(&camera), Some(CameraState::Allocated));
    assert!(!rig.node(0).is_streaming());
    assert_eq!(finished(&rig.drain()), [(1, RequestStatus::Cancelled)]);
}

#[test]
fn export_failure_leaves_pool_empty() {
    let mut rig = Rig::vimc(1);
    let camera = rig.camera();
    let stream = rig.configure(&camera, 4);
    rig.node(0).inject(Fault::ExportBuffers);

    let err = rig.manager.allocate_buffers(&camera, &[stream]).unwrap_err();

    assert!(matches!(err, Error::Device { .. }));
    assert_eq!(rig.manager.pool_len(&camera, stream), Some(0));
    assert_eq!(rig.manager.state(&camera), Some(CameraState::Configured));

    rig.manager.allocate_buffers(&camera, &[stream]).unwrap();
    assert_eq!(rig.manager.pool_len(&camera, stream), Some(4));
}

#[test]
fn short_allocation_is_rolled_back() {
    let options = VirtualDeviceOptions {
        max_buffers: 2,
        ..VirtualDeviceOptions::default()
    };
    let mut rig = Rig::vimc_with(1, options);
    let camera = rig.camera();
    let stream = rig.configure(&camera, 4);

    let err = rig.manager.allocate_buffers(&camera, &[stream]).unwrap_err();

    assert!(matches!(err, Error::Device { .. }));
    assert_eq!(rig.manager.pool_len(&camera, stream), Some(0));
    assert_eq!(rig.node(0).exported(), 0);
}

#[test]
fn start_failure_stays_allocated() {
    let mut rig = Rig::vimc(1);
    let camera = rig.camera();
    let stream = rig.configure(&camera, 2);
    rig.manager.allocate_buffers(&camera, &[stream]).unwrap();
    rig.node(0).inject(Fault::StreamOn);

    let err = rig.manager.start(&camera).unwrap_err();

    assert!(matches!(err, Error::Device { .. }));
    assert_eq!(rig.manager.state(&camera), Some(CameraState::Allocated));
    rig.manager.start(&camera).unwrap();
    assert_eq!(rig.manager.state(&camera), Some(CameraState::Streaming));
}

#[test]
fn queue_failure_leaves_request_out_of_flight() {
    let mut rig = Rig::vimc(1);
    let camera = rig.camera();
    let stream = rig.streaming(&camera, 2);
    rig.node(0).inject(Fault::QueueBuffer);

    let err = rig
        .manager
        .queue_request(&camera, request(&[(stream, 0)], 1))
        .unwrap_err();

    assert!(matches!(err, Error::Device { .. }));
    assert_eq!(rig.manager.in_flight(&camera), Some(0));
    rig.queue(&camera, stream, 2, 0);
    assert_eq!(rig.manager.in_flight(&camera), Some(1));
}

#[test]
fn removing_camera_releases_graph() {
    let mut rig = Rig::vimc(1);
    let camera = rig.camera();
    let stream = rig.streaming(&camera, 2);
    rig.queue(&camera, stream, 1, 0);
    let mut dm = DeviceMatch::new("vimc");
    dm.add("Raw Capture 1");
    assert!(rig.enumerator.search(&dm).is_none());

    rig.manager.remove_camera(&camera).unwrap();

    assert!(rig.manager.cameras().is_empty());
    assert_eq!(rig.manager.state(&camera), None);
    assert_eq!(finished(&rig.drain()), [(1, RequestStatus::Cancelled)]);
    assert!(rig.enumerator.search(&dm).is_some());
}

#[test]
fn removal_with_stop_fault_still_cancels_in_flight() {
    let mut rig = Rig::vimc(1);
    let camera = rig.camera();
    let stream = rig.streaming(&camera, 2);
    rig.queue(&camera, stream, 1, 0);
    rig.node(0).inject(Fault::StreamOff);

    let err = rig.manager.remove_camera(&camera).unwrap_err();

    assert!(matches!(err, Error::Device { .. }));
    assert_eq!(finished(&rig.drain()), [(1, RequestStatus::Cancelled)]);
    assert!(rig.manager.cameras().is_empty());
    assert_eq!(rig.manager.state(&camera), None);
}
