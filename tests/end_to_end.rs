//! Loopback tests driving a sender into the shared receive path

use std::net::{SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::unbounded;
use vban_transport::audio::AudioFrame;
use vban_transport::codec::decode_into;
use vban_transport::config::{ReceiverConfig, SenderConfig};
use vban_transport::constants::HEADER_SIZE;
use vban_transport::network::{
    ChannelForwarder, PacketHandler, SourceFormat, VbanReceiver, VbanSender,
};
use vban_transport::protocol::{BitResolution, Packet};
use vban_transport::Transport;

const WAIT: Duration = Duration::from_secs(2);

fn free_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn studio_sender(transport: &Transport, port: u16) -> VbanSender {
    let config = SenderConfig {
        port,
        stream_name: "studio".to_string(),
        host: "127.0.0.1".to_string(),
        sample_rate: 48000,
        format: BitResolution::Int16,
        ..SenderConfig::default()
    };
    let format = SourceFormat {
        sample_rate: 48000,
        channels: 2,
    };
    VbanSender::new(transport.clone(), format, config)
}

fn stereo_samples() -> Vec<f32> {
    (0..512).map(|i| ((i * 37) % 2048) as f32 / 2048.0 - 0.5).collect()
}

#[test]
fn studio_packet_reaches_subscriber_once() {
    let transport = Transport::new();
    let port = free_port();

    let device = transport.device(port).unwrap();
    let (tx, rx) = unbounded();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let id = device.add_subscriber(Arc::new(move |datagram: &[u8], _: SocketAddrV4| {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(datagram.to_vec());
    }));
    device.set_name(id, "studio");

    let mut sender = studio_sender(&transport, port);
    sender.start().unwrap();
    let samples = stereo_samples();
    assert!(sender.push_audio(AudioFrame::new(samples.clone(), 2, 0, 0)));

    let datagram = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(datagram.len(), HEADER_SIZE + 256 * 2 * 2);

    let packet = Packet::parse(&datagram).unwrap();
    let mut decoded = Vec::new();
    decode_into(packet.header.resolution, packet.payload, &mut decoded).unwrap();
    assert_eq!(decoded, samples);

    sender.stop();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    device.remove_subscriber(id);
    drop(device);
    transport.shutdown();
}

#[test]
fn sender_to_receiver_stream() {
    let transport = Transport::new();
    let port = free_port();

    let receiver = VbanReceiver::new(
        transport.clone(),
        ReceiverConfig {
            port,
            stream_name: "studio".to_string(),
            host: "127.0.0.1".to_string(),
            ..ReceiverConfig::default()
        },
    )
    .unwrap();

    let mut sender = studio_sender(&transport, port);
    sender.start().unwrap();
    for seq in 0..4 {
        sender.push_audio(AudioFrame::new(stereo_samples(), 2, 0, seq));
    }

    for expected in 0..4u32 {
        let decoded = receiver.frames().recv_timeout(WAIT).unwrap();
        assert!(!decoded.padding);
        assert_eq!(decoded.frame.sequence, expected);
        assert_eq!(decoded.sample_rate, 48000);
        assert_eq!(decoded.frame.samples, stereo_samples());
    }

    sender.stop();
    assert_eq!(receiver.stats().missed_events, 0);
    drop(receiver);
    assert_eq!(transport.registry().device_count(), 0);
    transport.shutdown();
}

#[test]
fn channel_forwarder_sees_every_stream() {
    let transport = Transport::new();
    let port = free_port();
    let device = transport.device(port).unwrap();

    let (tx, rx) = crossbeam_channel::bounded(16);
    let forwarder: Arc<dyn PacketHandler> = Arc::new(ChannelForwarder::new(tx));
    let id = device.add_subscriber(forwarder);

    let mut sender = studio_sender(&transport, port);
    sender.start().unwrap();
    sender.push_audio(AudioFrame::new(stereo_samples(), 2, 0, 0));

    let packet = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(packet.source.ip().octets(), [127, 0, 0, 1]);
    assert_eq!(&packet.data[..4], b"VBAN");

    sender.stop();
    device.remove_subscriber(id);
}
