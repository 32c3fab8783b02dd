//! 전송 계층 추상화
//!
//! 프로토콜은 데이터그램 소켓의 네 가지 기능만 사용한다:
//! 데드라인 읽기, 쓰기, 주소 지정 쓰기, 닫기.
//! 닫기는 유일한 취소 수단이며, 대기 중인 읽기를 `Error::ConnectionClosed`로 깨운다.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::{Config, Error, Result};

/// 데이터그램 전송 인터페이스
#[async_trait]
pub trait Transport: Send + Sync {
    /// 데드라인까지 한 데이터그램 읽기
    ///
    /// 데드라인 초과는 `Error::Timeout`, 닫힘은 `Error::ConnectionClosed`.
    async fn read(&self, buf: &mut [u8], deadline: Duration) -> Result<(usize, SocketAddr)>;

    /// 연결된 상대에게 쓰기
    async fn write(&self, buf: &[u8], deadline: Duration) -> Result<usize>;

    /// 지정 주소로 쓰기
    async fn write_to(&self, buf: &[u8], addr: SocketAddr, deadline: Duration) -> Result<usize>;

    /// 닫기 (대기 중인 읽기를 깨움)
    async fn close(&self) -> Result<()>;

    fn local_addr(&self) -> Result<SocketAddr>;

    fn is_closed(&self) -> bool;
}

/// 송신측이 교환마다 새 전송을 여는 팩토리
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, remote: SocketAddr) -> Result<Arc<dyn Transport>>;
}

/// tokio UDP 소켓 기반 전송
pub struct UdpTransport {
    socket: UdpSocket,
    closed: watch::Sender<bool>,
}

impl UdpTransport {
    /// 주소에 바인딩 (수신측)
    pub async fn bind(addr: SocketAddr, config: &Config) -> Result<Self> {
        let socket = tuned_socket(addr, config)?;
        Ok(Self::from_socket(socket))
    }

    /// 임시 포트로 바인딩 후 상대에 연결 (송신측)
    pub async fn connect(remote: SocketAddr, config: &Config) -> Result<Self> {
        let local: SocketAddr = if remote.is_ipv4() {
            ([0u8; 4], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = tuned_socket(local, config)?;
        socket.connect(remote).await?;
        Ok(Self::from_socket(socket))
    }

    pub fn from_socket(socket: UdpSocket) -> Self {
        let (closed, _) = watch::channel(false);
        Self { socket, closed }
    }
}

/// socket2로 버퍼 크기를 설정한 뒤 tokio 소켓으로 변환
fn tuned_socket(addr: SocketAddr, config: &Config) -> Result<UdpSocket> {
    let domain = if addr.is_ipv4() {
        socket2::Domain::IPV4
    } else {
        socket2::Domain::IPV6
    };

    let socket = socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))?;

    // 커널이 거부해도 기본값으로 계속 진행
    if let Err(e) = socket.set_recv_buffer_size(config.recv_buffer_size) {
        debug!("수신 버퍼 설정 실패: {}", e);
    }
    if let Err(e) = socket.set_send_buffer_size(config.send_buffer_size) {
        debug!("송신 버퍼 설정 실패: {}", e);
    }

    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

#[async_trait]
impl Transport for UdpTransport {
    async fn read(&self, buf: &mut [u8], deadline: Duration) -> Result<(usize, SocketAddr)> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(Error::ConnectionClosed);
        }

        tokio::select! {
            _ = closed.wait_for(|c| *c) => Err(Error::ConnectionClosed),
            result = tokio::time::timeout(deadline, self.socket.recv_from(buf)) => {
                match result {
                    Ok(Ok(received)) => Ok(received),
                    Ok(Err(e)) => Err(Error::Io(e)),
                    Err(_) => Err(Error::Timeout),
                }
            }
        }
    }

    async fn write(&self, buf: &[u8], deadline: Duration) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        match tokio::time::timeout(deadline, self.socket.send(buf)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn write_to(&self, buf: &[u8], addr: SocketAddr, deadline: Duration) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        match tokio::time::timeout(deadline, self.socket.send_to(buf, addr)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.send_replace(true);
        Ok(())
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

/// 기본 UDP 커넥터
#[derive(Debug, Clone)]
pub struct UdpConnector {
    config: Config,
}

impl UdpConnector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for UdpConnector {
    async fn connect(&self, remote: SocketAddr) -> Result<Arc<dyn Transport>> {
        let transport = UdpTransport::connect(remote, &self.config).await?;
        Ok(Arc::new(transport))
    }
}

/// 손실 시뮬레이션 전송
///
/// 나가는/들어오는 데이터그램을 `drop_rate` 비율로 버린다.
pub struct LossyTransport {
    inner: Arc<dyn Transport>,
    drop_rate: f64,
}

impl LossyTransport {
    pub fn new(inner: Arc<dyn Transport>, drop_rate: f64) -> Self {
        Self {
            inner,
            drop_rate: drop_rate.clamp(0.0, 1.0),
        }
    }

    fn should_drop(&self) -> bool {
        self.drop_rate > 0.0 && rand::random::<f64>() < self.drop_rate
    }
}

#[async_trait]
impl Transport for LossyTransport {
    async fn read(&self, buf: &mut [u8], deadline: Duration) -> Result<(usize, SocketAddr)> {
        let until = tokio::time::Instant::now() + deadline;
        loop {
            let remaining = until.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }

            let (len, addr) = self.inner.read(buf, remaining).await?;
            if self.should_drop() {
                trace!("수신 데이터그램 드롭 ({} bytes)", len);
                continue;
            }
            return Ok((len, addr));
        }
    }

    async fn write(&self, buf: &[u8], deadline: Duration) -> Result<usize> {
        if self.should_drop() {
            trace!("송신 데이터그램 드롭 ({} bytes)", buf.len());
            return Ok(buf.len());
        }
        self.inner.write(buf, deadline).await
    }

    async fn write_to(&self, buf: &[u8], addr: SocketAddr, deadline: Duration) -> Result<usize> {
        if self.should_drop() {
            trace!("송신 데이터그램 드롭 ({} bytes)", buf.len());
            return Ok(buf.len());
        }
        self.inner.write_to(buf, addr, deadline).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// 손실 시뮬레이션 커넥터
pub struct LossyConnector {
    inner: Arc<dyn Connector>,
    drop_rate: f64,
}

impl LossyConnector {
    pub fn new(inner: Arc<dyn Connector>, drop_rate: f64) -> Self {
        Self { inner, drop_rate }
    }
}

#[async_trait]
impl Connector for LossyConnector {
    async fn connect(&self, remote: SocketAddr) -> Result<Arc<dyn Transport>> {
        let transport = self.inner.connect(remote).await?;
        Ok(Arc::new(LossyTransport::new(transport, self.drop_rate)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_connect_write_read() {
        let config = Config::default();
        let server = UdpTransport::bind(loopback(), &config).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = UdpTransport::connect(server_addr, &config).await.unwrap();

        client.write(b"HREQ:item", Duration::from_secs(1)).await.unwrap();

        let mut buf = vec![0u8; 1500];
        let (len, from) = server.read(&mut buf, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&buf[..len], b"HREQ:item");
        assert_eq!(from, client.local_addr().unwrap());

        server
            .write_to(b"HREP:not_found", from, Duration::from_secs(1))
            .await
            .unwrap();
        let (len, _) = client.read(&mut buf, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&buf[..len], b"HREP:not_found");
    }

    #[tokio::test]
    async fn test_read_deadline() {
        let server = UdpTransport::bind(loopback(), &Config::default()).await.unwrap();
        let mut buf = vec![0u8; 64];
        let result = server.read(&mut buf, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_read() {
        let server = Arc::new(UdpTransport::bind(loopback(), &Config::default()).await.unwrap());

        let reader = server.clone();
        let pending = tokio::spawn(async move {
            let mut buf = vec![0u8; 64];
            reader.read(&mut buf, Duration::from_secs(30)).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        server.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("read was not unblocked")
            .unwrap();
        assert!(matches!(result, Err(Error::ConnectionClosed)));
        assert!(server.is_closed());
        assert!(matches!(
            server.write_to(b"x", loopback(), Duration::from_secs(1)).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_lossy_drops_everything() {
        let config = Config::default();
        let server = UdpTransport::bind(loopback(), &config).await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let connector = LossyConnector::new(Arc::new(UdpConnector::new(config)), 1.0);
        let client = connector.connect(server_addr).await.unwrap();
        client.write(b"lost", Duration::from_secs(1)).await.unwrap();

        let mut buf = vec![0u8; 64];
        let result = server.read(&mut buf, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(Error::Timeout)));
    }
}
