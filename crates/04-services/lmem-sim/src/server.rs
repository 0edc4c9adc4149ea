use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use device_codecs::DeviceCodec;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use transport::{serve_stream, Codec};

use crate::SimDevice;

/// TCP front end for a [`SimDevice`].
///
/// Every accepted connection is served on its own thread; calls from all
/// connections are applied to the same device under a mutex. Dropping the
/// server stops accepting, shuts down open connections and joins every thread.
pub struct SimServer {
    addr: SocketAddr,
    device: Arc<Mutex<SimDevice>>,
    stop: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
    connections: Arc<Mutex<Vec<Connection>>>,
}

struct Connection {
    stream: TcpStream,
    thread: JoinHandle<()>,
}

impl SimServer {
    /// Serves `device` on an ephemeral loopback port.
    pub fn spawn(device: SimDevice) -> io::Result<Self> {
        Self::bind("127.0.0.1:0", device)
    }

    /// Serves `device` on `addr`.
    pub fn bind(addr: &str, device: SimDevice) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let addr = listener.local_addr()?;
        let device = Arc::new(Mutex::new(device));
        let stop = Arc::new(AtomicBool::new(false));
        let connections = Arc::new(Mutex::new(Vec::new()));

        let acceptor = {
            let device = Arc::clone(&device);
            let stop = Arc::clone(&stop);
            let connections = Arc::clone(&connections);
            thread::Builder::new()
                .name("lmem-sim-accept".into())
                .spawn(move || accept_loop(listener, device, stop, connections))?
        };
        info!(%addr, "simulated device listening");

        Ok(Self {
            addr,
            device,
            stop,
            acceptor: Some(acceptor),
            connections,
        })
    }

    /// Address the server accepts connections on.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shared handle to the served device, for inspecting its state.
    pub fn device(&self) -> Arc<Mutex<SimDevice>> {
        Arc::clone(&self.device)
    }
}

impl Drop for SimServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        // Wake the acceptor so it observes the stop flag.
        let _ = TcpStream::connect(self.addr);
        if let Some(acceptor) = self.acceptor.take() {
            if acceptor.join().is_err() {
                warn!("simulated device acceptor panicked");
            }
        }
        // The acceptor is gone, so no connection can be added past this point.
        let connections = std::mem::take(&mut *self.connections.lock());
        for connection in connections {
            let _ = connection.stream.shutdown(Shutdown::Both);
            if connection.thread.join().is_err() {
                warn!("simulated device connection panicked");
            }
        }
    }
}

fn accept_loop(
    listener: TcpListener,
    device: Arc<Mutex<SimDevice>>,
    stop: Arc<AtomicBool>,
    connections: Arc<Mutex<Vec<Connection>>>,
) {
    for incoming in listener.incoming() {
        if stop.load(Ordering::Acquire) {
            break;
        }
        let stream = match incoming {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "accept failed");
                continue;
            }
        };
        let control = match stream.try_clone() {
            Ok(control) => control,
            Err(err) => {
                warn!(error = %err, "cannot track connection");
                continue;
            }
        };
        let device = Arc::clone(&device);
        let spawned = thread::Builder::new()
            .name("lmem-sim-conn".into())
            .spawn(move || serve_connection(stream, device));
        match spawned {
            Ok(thread) => {
                let mut connections = connections.lock();
                connections.retain(|c| !c.thread.is_finished());
                connections.push(Connection {
                    stream: control,
                    thread,
                });
            }
            Err(err) => warn!(error = %err, "failed to spawn connection thread"),
        }
    }
}

fn serve_connection(mut stream: TcpStream, device: Arc<Mutex<SimDevice>>) {
    let peer = stream.peer_addr().ok();
    let codec = DeviceCodec;
    let result = serve_stream(&mut stream, |call| {
        let cmd = codec.decode_cmd(call);
        let outcome = device.lock().handle(cmd);
        codec.encode_rep(outcome)
    });
    match result {
        Ok(served) => debug!(?peer, served, "connection closed"),
        Err(err) => warn!(?peer, error = %err, "connection aborted"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_abi::{DeviceCmd, DeviceRep, DeviceService, FaultKind};
    use device_codecs::RemoteDevice;
    use transport::{ChannelOptions, TcpChannel};

    fn connect(server: &SimServer) -> RemoteDevice<TcpChannel> {
        let addr = server.local_addr();
        let channel = TcpChannel::connect(
            &addr.ip().to_string(),
            addr.port(),
            &ChannelOptions::default(),
        )
        .expect("connect");
        RemoteDevice::new(channel)
    }

    #[test]
    fn serves_calls_over_tcp() {
        let server = SimServer::spawn(SimDevice::default()).expect("spawn");
        let mut remote = connect(&server);

        let rep = remote
            .call(DeviceCmd::InitConfiguration {
                name: crate::CONFIGURATION_NAME.into(),
            })
            .expect("init");
        assert!(matches!(rep, DeviceRep::Handle(_)));
        assert!(server.device().lock().configuration_loaded());

        let err = remote
            .call(DeviceCmd::InitConfiguration {
                name: crate::CONFIGURATION_NAME.into(),
            })
            .unwrap_err();
        assert_eq!(err.fault().map(|f| f.kind), Some(FaultKind::ConfigurationBusy));

        remote.shutdown().expect("shutdown");
    }

    #[test]
    fn drop_stops_accepting() {
        let server = SimServer::spawn(SimDevice::default()).expect("spawn");
        let addr = server.local_addr();
        drop(server);
        let refused = TcpChannel::connect(
            &addr.ip().to_string(),
            addr.port(),
            &ChannelOptions::default(),
        );
        assert!(refused.is_err());
    }

    #[test]
    fn drop_closes_open_connections() {
        let server = SimServer::spawn(SimDevice::default()).expect("spawn");
        let device = server.device();
        let mut remote = connect(&server);
        remote
            .call(DeviceCmd::InitConfiguration {
                name: crate::CONFIGURATION_NAME.into(),
            })
            .expect("init");

        drop(server);
        // Every server thread has been joined and released its share.
        assert_eq!(Arc::strong_count(&device), 1);
        assert!(remote.call(DeviceCmd::FreeConfiguration).is_err());
    }
}
