//! Bootstraps the two ordered channels a [`p2pftp_core::session::Session`]
//! needs, using the rendezvous service (spec §6) to exchange a pair of
//! ephemeral TCP endpoints in place of the out-of-scope SDP/ICE/DTLS
//! substrate. The opaque `sdp` field carries `"host:control_port:data_port"`
//! — still opaque to the relay, which never parses it.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use p2pftp_core::channel::Channel;
use p2pftp_core::signaling::{RendezvousClient, RendezvousMessage};
use tokio::net::{TcpListener, TcpStream};

use crate::transport::TcpChannel;

/// The result of successfully linking up with a peer: our own assigned
/// token, the peer's token, and the two channels bound to them.
pub struct PeerLink {
    pub local_token: String,
    pub peer_token: String,
    pub control: Arc<dyn Channel>,
    pub data: Arc<dyn Channel>,
}

fn encode_endpoint(host: &str, control_port: u16, data_port: u16) -> String {
    format!("{host}:{control_port}:{data_port}")
}

fn decode_endpoint(sdp: &str) -> Result<(String, u16, u16)> {
    let mut parts = sdp.rsplitn(3, ':');
    let data_port: u16 = parts.next().context("missing data port")?.parse()?;
    let control_port: u16 = parts.next().context("missing control port")?.parse()?;
    let host = parts.next().context("missing host")?.to_string();
    Ok((host, control_port, data_port))
}

/// Acts as the connecting side: registers with the rendezvous, requests
/// `peer_token`, advertises a listening endpoint as its `offer`, and waits
/// for the peer to dial in on both ports. `advertise_host` is both bound to
/// and advertised to the peer — it must be an address the peer can reach.
pub async fn connect_to_peer(rendezvous_url: &str, peer_token: &str, advertise_host: &str) -> Result<PeerLink> {
    let mut client = RendezvousClient::connect(rendezvous_url)
        .await
        .map_err(|e| anyhow!(e))?;

    let local_token = match client.recv().await {
        Some(Ok(RendezvousMessage::Token { token })) => token,
        other => bail!("expected initial token message from rendezvous, got {other:?}"),
    };

    let control_listener = TcpListener::bind((advertise_host, 0)).await?;
    let data_listener = TcpListener::bind((advertise_host, 0)).await?;
    let control_port = control_listener.local_addr()?.port();
    let data_port = data_listener.local_addr()?.port();

    client
        .request_connect(peer_token)
        .await
        .map_err(|e| anyhow!(e))?;

    let mut control_stream: Option<TcpStream> = None;
    let mut data_stream: Option<TcpStream> = None;
    let mut offer_sent = false;

    loop {
        if control_stream.is_some() && data_stream.is_some() {
            break;
        }
        tokio::select! {
            message = client.recv() => {
                match message {
                    Some(Ok(RendezvousMessage::Accepted { token })) if token == peer_token => {
                        if !offer_sent {
                            client.send(&RendezvousMessage::Offer {
                                peer_token: Some(peer_token.to_string()),
                                token: None,
                                sdp: encode_endpoint(advertise_host, control_port, data_port),
                            }).await.map_err(|e| anyhow!(e))?;
                            offer_sent = true;
                        }
                    }
                    Some(Ok(RendezvousMessage::Rejected { .. })) => bail!("peer rejected the connection"),
                    Some(Ok(RendezvousMessage::Error { .. } )) => bail!("rendezvous reported an error"),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => bail!("rendezvous error: {e}"),
                    None => bail!("rendezvous connection closed before peer linked up"),
                }
            }
            accepted = control_listener.accept(), if control_stream.is_none() => {
                control_stream = Some(accepted?.0);
            }
            accepted = data_listener.accept(), if data_stream.is_none() => {
                data_stream = Some(accepted?.0);
            }
        }
    }

    Ok(PeerLink {
        local_token,
        peer_token: peer_token.to_string(),
        control: TcpChannel::spawn(control_stream.unwrap()),
        data: TcpChannel::spawn(data_stream.unwrap()),
    })
}

/// Acts as the listening side: registers with the rendezvous, prints no
/// opinion about who connects, accepts the first incoming request, and
/// dials the endpoint the peer advertised in its `offer`.
pub async fn wait_for_peer(rendezvous_url: &str) -> Result<(String, PeerLink)> {
    let mut client = RendezvousClient::connect(rendezvous_url)
        .await
        .map_err(|e| anyhow!(e))?;

    let local_token = match client.recv().await {
        Some(Ok(RendezvousMessage::Token { token })) => token,
        other => bail!("expected initial token message from rendezvous, got {other:?}"),
    };

    let mut pending_peer: Option<String> = None;

    loop {
        match client.recv().await {
            Some(Ok(RendezvousMessage::Request { token })) => {
                client.accept(token.clone()).await.map_err(|e| anyhow!(e))?;
                pending_peer = Some(token);
            }
            Some(Ok(RendezvousMessage::Offer { token: Some(token), sdp, .. })) if pending_peer.as_deref() == Some(token.as_str()) => {
                let (host, control_port, data_port) = decode_endpoint(&sdp)?;
                let control_stream = TcpStream::connect((host.as_str(), control_port)).await?;
                let data_stream = TcpStream::connect((host.as_str(), data_port)).await?;

                client.send(&RendezvousMessage::Answer {
                    peer_token: Some(token.clone()),
                    token: None,
                    sdp: "ok".into(),
                }).await.map_err(|e| anyhow!(e))?;

                return Ok((
                    local_token.clone(),
                    PeerLink {
                        local_token,
                        peer_token: token,
                        control: TcpChannel::spawn(control_stream),
                        data: TcpChannel::spawn(data_stream),
                    },
                ));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => bail!("rendezvous error: {e}"),
            None => bail!("rendezvous connection closed before a peer linked up"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_round_trip() {
        let encoded = encode_endpoint("127.0.0.1", 40001, 40002);
        let (host, control_port, data_port) = decode_endpoint(&encoded).unwrap();
        assert_eq!(host, "127.0.0.1");
        assert_eq!(control_port, 40001);
        assert_eq!(data_port, 40002);
    }

    #[test]
    fn test_decode_rejects_malformed_endpoint() {
        assert!(decode_endpoint("not-an-endpoint").is_err());
    }
}
