//! Channel failures and remote faults as seen by a session.

use std::io::Read;
use std::net::TcpListener;
use std::thread;

use device_abi::{DeviceCmd, DeviceService, FaultKind};
use device_codecs::RemoteDevice;
use lmem_loopback::{connect, LoopbackError};
use lmem_sim::{SimDevice, SimServer, CONFIGURATION_NAME};
use transport::{ChannelOptions, TcpChannel};

#[test]
fn peer_hanging_up_mid_session_is_a_lost_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        // Swallow the first request, then hang up without answering.
        let mut prefix = [0u8; 4];
        let _ = stream.read_exact(&mut prefix);
    });

    let mut session =
        connect("127.0.0.1", port, &ChannelOptions::default()).expect("connect");
    let err = session.load_configuration(CONFIGURATION_NAME).unwrap_err();
    assert!(matches!(err, LoopbackError::Connection(_)), "{err:?}");
    assert!(!err.is_connect_failure());
    peer.join().expect("peer thread");
}

#[test]
fn remote_faults_keep_their_kind_across_the_wire() {
    let server = SimServer::spawn(SimDevice::default()).expect("spawn simulator");
    let addr = server.local_addr();
    let channel = TcpChannel::connect(&addr.ip().to_string(), addr.port(), &ChannelOptions::default())
        .expect("connect");
    let mut remote = RemoteDevice::new(channel);

    let err = remote
        .call(DeviceCmd::AllocateBuffer {
            elements: lmem_sim::MAX_BUFFER_ELEMENTS + 1,
        })
        .unwrap_err();
    assert_eq!(err.fault().map(|f| f.kind), Some(FaultKind::OutOfBounds));

    let err = remote.call(DeviceCmd::FreeConfiguration).unwrap_err();
    assert_eq!(err.fault().map(|f| f.kind), Some(FaultKind::InvalidHandle));
    remote.shutdown().expect("shutdown");
}

#[test]
fn session_misuse_never_reaches_the_service() {
    let server = SimServer::spawn(SimDevice::default()).expect("spawn simulator");
    let addr = server.local_addr();
    let mut session = connect(&addr.ip().to_string(), addr.port(), &ChannelOptions::default())
        .expect("connect");

    let config = session
        .load_configuration(CONFIGURATION_NAME)
        .expect("load configuration");
    let buffer = session.allocate(8).expect("allocate");
    session.release(buffer).expect("release");

    let err = session.send(buffer, &[1; 8]).unwrap_err();
    assert!(matches!(err, LoopbackError::ProtocolMisuse { op: "sendData", .. }), "{err:?}");

    session.free_configuration(config).expect("free");
    session.close().expect("close");
    assert_eq!(server.device().lock().live_handles(), 0);
}
