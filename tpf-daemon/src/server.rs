//! Unix Socket Server
//!
//! Serves the fan service method table as newline-delimited JSON.
//!
//! # Security Features
//! - **Socket permissions**: world-connectable, symlinks refused on bind
//! - **Peer credentials**: UID/PID audit logging for every mutation
//! - **Authorization**: state-changing requests are accepted from root only
//! - **Connection limits**: maximum concurrent connections enforced
//! - **Timeouts**: read/write timeouts prevent resource exhaustion
//! - **Message limits**: bounded line reader, 8 KiB per message

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use tpf_core::{FanService, SettingLimits, SettingsUpdate};
use tpf_error::TpfanError;
use tpf_protocol::{
    FanStatus, ModelInfo, OptionLimits, Request, RequestEnvelope, Response, ResponseData,
    ResponseEnvelope, SensorName, SensorTriggers, SensorValue, SettingsSnapshot, Temperature,
    TriggerPoint,
};

// ============================================================================
// Security Constants
// ============================================================================

/// Maximum concurrent client connections
const MAX_CONNECTIONS: usize = 16;

/// Maximum message size in bytes
const MAX_MESSAGE_SIZE: usize = tpf_protocol::MAX_MESSAGE_SIZE;

/// Read timeout per message
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Write timeout per message
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Socket permissions; mutations are gated on the peer UID instead
const SOCKET_MODE: u32 = 0o666;

static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

async fn read_line_bounded<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_len: usize,
) -> std::io::Result<usize> {
    out.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(0);
        }

        let mut take_len = available.len();
        let mut found_newline = false;
        if let Some(pos) = available.iter().position(|b| *b == b'\n') {
            take_len = pos + 1;
            found_newline = true;
        }

        let remaining = max_len.saturating_sub(out.len());
        if take_len > remaining {
            // Consume enough to make forward progress, but don't buffer beyond max_len.
            let consume_len = remaining.min(available.len());
            reader.consume(consume_len);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Message too large",
            ));
        }

        out.extend_from_slice(&available[..take_len]);
        reader.consume(take_len);

        if found_newline {
            return Ok(out.len());
        }
    }
}

// ============================================================================
// Server
// ============================================================================

/// Create the listening socket, replacing a stale one
pub fn bind_socket(socket_path: &Path) -> std::io::Result<UnixListener> {
    if let Ok(metadata) = socket_path.symlink_metadata() {
        if metadata.file_type().is_symlink() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Socket path is a symlink - refusing for security",
            ));
        }
        std::fs::remove_file(socket_path)?;
        debug!("Removed existing socket file");
    }

    let listener = UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))?;

    info!(
        "Listening on {} (mode {:o}, max_conn={}, max_msg={})",
        socket_path.display(),
        SOCKET_MODE,
        MAX_CONNECTIONS,
        MAX_MESSAGE_SIZE
    );
    Ok(listener)
}

/// Accept clients until the task is cancelled
pub async fn run_server(listener: UnixListener, service: Arc<Mutex<FanService>>) -> std::io::Result<()> {
    loop {
        let (stream, _addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Accept error: {}", e);
                continue;
            }
        };

        let current = ACTIVE_CONNECTIONS.load(Ordering::SeqCst);
        if current >= MAX_CONNECTIONS {
            warn!("Connection limit reached ({}), rejecting new connection", current);
            drop(stream);
            continue;
        }

        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::SeqCst);
        let service = service.clone();
        tokio::spawn(async move {
            handle_client(stream, service).await;
            ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

/// Client credentials from Unix socket peer
#[derive(Debug, Clone, Copy)]
struct PeerCredentials {
    uid: u32,
    pid: i32,
}

impl PeerCredentials {
    fn is_root(&self) -> bool {
        self.uid == 0
    }
}

async fn handle_client(stream: UnixStream, service: Arc<Mutex<FanService>>) {
    let cred = match get_peer_credentials(&stream) {
        Some(c) => c,
        None => {
            error!("Failed to get peer credentials, rejecting connection");
            return;
        }
    };
    debug!("Connection from uid={}, pid={}", cred.uid, cred.pid);

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::with_capacity(MAX_MESSAGE_SIZE);
    let mut request_count: u64 = 0;
    let connection_start = Instant::now();

    loop {
        let read_result = timeout(
            READ_TIMEOUT,
            read_line_bounded(&mut reader, &mut line, MAX_MESSAGE_SIZE),
        )
        .await;

        match read_result {
            Ok(Ok(0)) => {
                debug!(
                    "Client disconnected: uid={}, pid={}, requests={}, duration={:?}",
                    cred.uid,
                    cred.pid,
                    request_count,
                    connection_start.elapsed()
                );
                break;
            }
            Ok(Ok(n)) => {
                request_count += 1;
                trace!("Request #{} from uid={}: {} bytes", request_count, cred.uid, n);

                let line_str = match std::str::from_utf8(&line) {
                    Ok(s) => s,
                    Err(e) => {
                        let protocol_error = TpfanError::IpcProtocol(format!("non-UTF8 request: {}", e));
                        debug!("{} from uid={}", protocol_error, cred.uid);
                        let response = ResponseEnvelope::new(0, Response::error("Invalid request encoding"));
                        let _ = send_response(&mut writer, &response).await;
                        break;
                    }
                };

                let response = process_request(line_str, &cred, &service).await;
                if send_response(&mut writer, &response).await.is_err() {
                    break;
                }
            }
            Ok(Err(e)) => {
                if e.kind() == std::io::ErrorKind::InvalidData {
                    let too_large = TpfanError::MessageTooLarge {
                        size: MAX_MESSAGE_SIZE + 1,
                        max_size: MAX_MESSAGE_SIZE,
                    };
                    warn!("{} from uid={}, pid={}", too_large, cred.uid, cred.pid);
                    let response = ResponseEnvelope::new(0, Response::error("Message too large"));
                    let _ = send_response(&mut writer, &response).await;
                } else {
                    error!("Read error from uid={}, pid={}: {}", cred.uid, cred.pid, e);
                }
                break;
            }
            Err(_) => {
                debug!("Read timeout for uid={}, pid={}", cred.uid, cred.pid);
                break;
            }
        }
    }
}

/// Send response with timeout
async fn send_response(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    response: &ResponseEnvelope,
) -> Result<(), ()> {
    let response_json = serde_json::to_string(response).unwrap_or_else(|_| {
        r#"{"id":0,"status":"error","message":"Serialization error"}"#.to_string()
    });

    let write_result = timeout(WRITE_TIMEOUT, async {
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        Ok::<_, std::io::Error>(())
    })
    .await;

    match write_result {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => {
            error!("Write error: {}", e);
            Err(())
        }
        Err(_) => {
            error!("Write timeout");
            Err(())
        }
    }
}

/// Get peer credentials (uid, pid) from Unix socket
#[cfg(target_os = "linux")]
fn get_peer_credentials(stream: &UnixStream) -> Option<PeerCredentials> {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();
    // SAFETY: ucred is a plain C struct; an all-zero value is valid.
    let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

    // SAFETY: fd is a live socket owned by `stream`, and cred/len describe a
    // writable buffer of the size getsockopt expects for SO_PEERCRED.
    let result = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut cred as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };

    if result == 0 {
        Some(PeerCredentials {
            uid: cred.uid,
            pid: cred.pid,
        })
    } else {
        None
    }
}

#[cfg(not(target_os = "linux"))]
fn get_peer_credentials(_stream: &UnixStream) -> Option<PeerCredentials> {
    None
}

/// Parse, authorize and run a single request
async fn process_request(
    line: &str,
    cred: &PeerCredentials,
    service: &Mutex<FanService>,
) -> ResponseEnvelope {
    let envelope: RequestEnvelope = match serde_json::from_str(line.trim()) {
        Ok(e) => e,
        Err(e) => {
            let parse_error = TpfanError::from(e);
            debug!("Invalid request from uid={}: {}", cred.uid, parse_error);
            return ResponseEnvelope::new(0, Response::error("Invalid request format"));
        }
    };

    let request_id = envelope.id;
    let request = envelope.request;
    let request_type = request.type_name();

    if let Err(e) = request.validate() {
        warn!("Request {} (id={}) rejected for uid={}: {}", request_type, request_id, cred.uid, e);
        return ResponseEnvelope::new(request_id, Response::error(e));
    }

    if request.is_mutation() {
        if !cred.is_root() {
            warn!(
                "AUDIT: {} denied for uid={}, pid={}",
                request_type, cred.uid, cred.pid
            );
            return ResponseEnvelope::new(request_id, Response::error("Not authorized"));
        }
        info!("AUDIT: {} (id={}) by uid={}, pid={}", request_type, request_id, cred.uid, cred.pid);
    } else {
        debug!("Processing {} (id={}) from uid={}, pid={}", request_type, request_id, cred.uid, cred.pid);
    }

    let response = {
        let mut service = service.lock().await;
        dispatch(request, &mut service)
    };

    if let Response::Error { ref message } = response {
        warn!("Request {} (id={}) failed for uid={}: {}", request_type, request_id, cred.uid, message);
    }

    ResponseEnvelope::new(request_id, response)
}

/// Map one protocol request onto the fan service
fn dispatch(request: Request, service: &mut FanService) -> Response {
    match request {
        Request::Ping => Response::ok_string("pong"),

        Request::GetVersion => Response::ok_string(service.version()),

        Request::GetTemperatures => reply(service.temperatures(), |readings| {
            ResponseData::temps(
                readings
                    .into_iter()
                    .map(|r| Temperature {
                        sensor: r.sensor_id,
                        celsius: r.value,
                    })
                    .collect(),
            )
        }),

        Request::GetFanState => reply(service.fan_state(), |state| {
            ResponseData::fan(FanStatus {
                level: state.level.value(),
                rpm: state.rpm,
            })
        }),

        Request::ResetTrips => {
            service.reset_trips();
            Response::ok()
        }

        Request::GetTripTemperatures => Response::Ok(ResponseData::trips(sensor_values(
            service.trip_temperatures(),
            i64::from,
        ))),

        Request::GetTripFanSpeeds => Response::Ok(ResponseData::speeds(sensor_values(
            service.trip_speeds(),
            |speed| i64::from(speed.value()),
        ))),

        Request::GetModelInfo => {
            let info = service.model_info();
            Response::Ok(ResponseData::model(ModelInfo {
                vendor: info.vendor,
                name: info.name,
                id: info.id,
                profile_name: info.profile_name,
                profile_id: info.profile_id,
            }))
        }

        Request::GetLoadedProfiles => Response::Ok(ResponseData::profile_list(service.loaded_profiles())),

        Request::GetProfileComment => Response::ok_string(service.profile_comment()),

        Request::IsProfileExactlyMatched => Response::ok_bool(service.is_profile_exactly_matched()),

        Request::GetSensorCount => Response::Ok(ResponseData::number(u32::from(service.sensor_count()))),

        Request::GetSettingLimits { option } => reply(service.setting_limits(&option), |limits| {
            ResponseData::option_limits(match limits {
                SettingLimits::Range { min, max } => OptionLimits::Range { min, max },
                SettingLimits::FanSpeeds { values } => OptionLimits::FanSpeeds { values },
                SettingLimits::Backends { values } => OptionLimits::Backends { values },
            })
        }),

        Request::GetSettings => {
            let summary = service.settings();
            Response::Ok(ResponseData::snapshot(SettingsSnapshot {
                enabled: summary.enabled,
                override_profile: summary.override_profile,
                hysteresis: summary.hysteresis,
                min_interval_duration: summary.min_interval_duration,
            }))
        }

        Request::SetSettings { settings } => {
            let update = SettingsUpdate {
                enabled: settings.enabled,
                override_profile: settings.override_profile,
                hysteresis: settings.hysteresis,
                min_interval_duration: settings.min_interval_duration,
            };
            reply(service.set_settings(&update), |()| ResponseData::none())
        }

        Request::GetSensorNames => Response::Ok(ResponseData::names(
            service
                .sensor_names()
                .into_iter()
                .map(|(sensor, name)| SensorName { sensor, name })
                .collect(),
        )),

        Request::SetSensorNames { names } => {
            let names: BTreeMap<_, _> = names.into_iter().map(|n| (n.sensor, n.name)).collect();
            reply(service.set_sensor_names(&names), |()| ResponseData::none())
        }

        Request::GetTriggerPoints => Response::Ok(ResponseData::triggers(
            service
                .trigger_points()
                .into_iter()
                .map(|(sensor, triggers)| SensorTriggers {
                    sensor,
                    triggers: triggers
                        .into_iter()
                        .map(|(temperature, speed)| TriggerPoint {
                            temperature: i64::from(temperature),
                            speed: i64::from(speed.value()),
                        })
                        .collect(),
                })
                .collect(),
        )),

        Request::SetTriggerPoints { points } => {
            let points: BTreeMap<_, _> = points
                .into_iter()
                .map(|p| {
                    let triggers = p
                        .triggers
                        .into_iter()
                        .map(|t| (t.temperature, t.speed))
                        .collect();
                    (p.sensor, triggers)
                })
                .collect();
            reply(service.set_trigger_points(&points), |()| ResponseData::none())
        }

        Request::Save => reply(service.save(), |()| ResponseData::none()),

        Request::GetProfileString => Response::ok_string(service.profile_string()),
    }
}

fn reply<T>(result: tpf_core::Result<T>, ok: impl FnOnce(T) -> ResponseData) -> Response {
    match result {
        Ok(value) => Response::Ok(ok(value)),
        Err(e) => {
            if e.is_fatal() {
                error!("Fan service error: {}", e);
            }
            Response::error(e.to_string())
        }
    }
}

fn sensor_values<T>(map: BTreeMap<u8, T>, value: impl Fn(T) -> i64) -> Vec<SensorValue> {
    map.into_iter()
        .map(|(sensor, v)| SensorValue {
            sensor,
            value: value(v),
        })
        .collect()
}
