use bytes::{BufMut, Bytes, BytesMut};
use http::{HeaderMap, Method, Request, Response, Uri, header, response};
use itertools::Itertools;
use log::trace;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpStream, lookup_host},
};
use tokio_native_tls::{TlsConnector as TokioTlsConnector, native_tls::TlsConnector};

pub trait AsyncReadWrite: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadWrite for T {}

pub type BoxedStream = Box<dyn AsyncReadWrite>;

/// The statistics payload is a single short line.
pub const MAX_RESPONSE_SIZE: usize = 8 * 1024;

/// Builds a bodiless GET request for `uri`, asking the server to close the
/// connection once the response is sent.
pub fn get_request(uri: &Uri) -> anyhow::Result<Request<Bytes>> {
    let authority = uri
        .authority()
        .ok_or_else(|| anyhow::anyhow!("URL error: no host name"))?
        .as_str();
    let host = authority
        .find('@')
        .map(|idx| authority.split_at(idx + 1).1)
        .unwrap_or(authority);

    if host.is_empty() {
        anyhow::bail!("URL error: empty host name");
    }

    let req = Request::builder()
        .method(Method::GET)
        .header(header::HOST, host)
        .header(header::CONNECTION, "close")
        .header(header::ACCEPT_ENCODING, "identity")
        .uri(uri)
        .body(Bytes::new())?;

    Ok(req)
}

pub fn is_tls(uri: &Uri) -> bool {
    uri.scheme_str() == Some("https")
}

/// Opens a plain or TLS stream to the host of `uri`, trying every resolved
/// address in turn, IPv4 and IPv6 interleaved.
pub async fn connect(uri: &Uri) -> anyhow::Result<BoxedStream> {
    let host = uri
        .host()
        .ok_or_else(|| anyhow::anyhow!("URL error: no host name"))?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    let tls = is_tls(uri);
    let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });

    let addrs = {
        let (v4, v6): (Vec<_>, Vec<_>) = lookup_host((host, port)).await?.partition(|a| a.is_ipv4());
        v4.into_iter().interleave(v6).collect::<Vec<_>>()
    };

    let mut stream = None;
    for addr in addrs {
        trace!("connecting to {addr} for {uri}");
        match TcpStream::connect(addr).await {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(e) => trace!("connection attempt to {addr} failed: {e}"),
        }
    }
    let stream = stream.ok_or_else(|| anyhow::anyhow!("I/O error: unable to connect {uri}"))?;

    let stream: BoxedStream = if tls {
        let connector = TokioTlsConnector::from(TlsConnector::new()?);
        Box::new(connector.connect(host, stream).await?)
    } else {
        Box::new(stream)
    };

    Ok(stream)
}

pub async fn write_request<T: AsRef<[u8]>>(
    stream: &mut BoxedStream,
    req: &Request<T>,
) -> anyhow::Result<()> {
    stream.write_all(&assemble_http_request(req)).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads until the peer closes the connection, giving up once more than
/// `MAX_RESPONSE_SIZE` bytes have arrived.
pub async fn read_to_end(stream: &mut BoxedStream) -> std::io::Result<Bytes> {
    let mut buffer = BytesMut::with_capacity(128);
    while stream.read_buf(&mut buffer).await? != 0 {
        if buffer.len() > MAX_RESPONSE_SIZE {
            return Err(std::io::Error::other(format!(
                "response exceeds {MAX_RESPONSE_SIZE} bytes"
            )));
        }
    }
    trace!("Response: {:?}", String::from_utf8_lossy(&buffer));
    Ok(buffer.freeze())
}

fn assemble_http_request<T: AsRef<[u8]>>(req: &Request<T>) -> Bytes {
    let mut buffer = BytesMut::with_capacity(128);

    buffer.put_slice(
        format!(
            "{} {} {:?}\r\n",
            req.method(),
            req.uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/"),
            req.version()
        )
        .as_bytes(),
    );

    for (name, value) in req.headers() {
        buffer.put_slice(name.as_str().as_bytes());
        buffer.put_slice(b": ");
        buffer.put(value.as_bytes());
        buffer.put_slice(b"\r\n");
    }

    buffer.put_slice(b"\r\n");
    buffer.put_slice(req.body().as_ref());

    trace!("Request: {:?}", String::from_utf8_lossy(&buffer));

    buffer.freeze()
}

pub fn parse_http_response(bytes: Bytes) -> anyhow::Result<Response<Bytes>> {
    const MAX_HEADERS: usize = 64;
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut headers);

    let httparse::Status::Complete(body_start_index) = resp.parse(&bytes)? else {
        anyhow::bail!("HTTP error: response is incomplete");
    };

    let mut response_builder = response::Builder::new()
        .status(
            resp.code
                .ok_or_else(|| anyhow::anyhow!("HTTP error: missing status code"))?,
        )
        .version(match resp.version {
            Some(0) => http::Version::HTTP_10,
            _ => http::Version::HTTP_11,
        });

    for header in resp.headers.iter() {
        response_builder = response_builder.header(header.name, header.value);
    }

    let (parts, raw) = response_builder
        .body(bytes.slice(body_start_index..))?
        .into_parts();
    let body = decode_body(&parts.headers, raw)?;

    Ok(Response::from_parts(parts, body))
}

/// Strips the transfer framing from a body read up to EOF. A body shorter
/// than its declared length is an error, bytes past it are dropped.
fn decode_body(headers: &HeaderMap, raw: Bytes) -> anyhow::Result<Bytes> {
    let chunked = headers
        .get_all(header::TRANSFER_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
    if chunked {
        return decode_chunked(raw);
    }

    let Some(length) = headers.get(header::CONTENT_LENGTH) else {
        return Ok(raw);
    };
    let length = length
        .to_str()
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .ok_or_else(|| anyhow::anyhow!("HTTP error: invalid Content-Length {length:?}"))?;

    if raw.len() < length {
        anyhow::bail!(
            "HTTP error: body is {} bytes, Content-Length is {length}",
            raw.len()
        );
    }

    Ok(raw.slice(..length))
}

fn decode_chunked(mut raw: Bytes) -> anyhow::Result<Bytes> {
    let mut body = BytesMut::new();

    loop {
        let httparse::Status::Complete((data_start, size)) = httparse::parse_chunk_size(&raw)
            .map_err(|_| anyhow::anyhow!("HTTP error: invalid chunk size"))?
        else {
            anyhow::bail!("HTTP error: chunked body is incomplete");
        };
        if size == 0 {
            // trailers are ignored
            return Ok(body.freeze());
        }

        let data_end = usize::try_from(size)
            .ok()
            .and_then(|size| data_start.checked_add(size))
            .filter(|end| end.saturating_add(2) <= raw.len())
            .ok_or_else(|| anyhow::anyhow!("HTTP error: chunked body is incomplete"))?;
        if &raw[data_end..data_end + 2] != b"\r\n" {
            anyhow::bail!("HTTP error: chunk is not terminated by CRLF");
        }

        body.put_slice(&raw[data_start..data_end]);
        raw = raw.slice(data_end + 2..);
    }
}
