use crate::probe::{Context, ProbeClass, ProbeError, ProbeErrorKind, ProbeResult, ProbeTarget};
use curl::Error as CurlError;
use curl::easy::{Easy2, Handler, WriteError};
use url::Url;

pub const DEFAULT_MAX_READ_BYTES: u64 = 64 * 1024;
const MAX_REDIRECTS: u32 = 10;
const USER_AGENT: &str = concat!("prober/", env!("CARGO_PKG_VERSION"));

/// Fetches a URL and checks the response status and, optionally, its body.
#[derive(Clone, Debug)]
pub struct HttpProbe {
    url: Url,
    want_text: Option<String>,
    max_read_bytes: u64,
}

impl HttpProbe {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            want_text: None,
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
        }
    }

    /// Require the first `max_read_bytes` of the body to contain `text`.
    pub fn want_text(mut self, text: impl Into<String>) -> Self {
        self.want_text = Some(text.into());
        self
    }

    /// Stop reading the body after this many bytes (0 = unlimited).
    pub fn max_read_bytes(mut self, limit: u64) -> Self {
        self.max_read_bytes = limit;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl ProbeTarget for HttpProbe {
    fn execute(&self, ctx: &Context) -> ProbeResult {
        let collector = BodyCollector::new(
            ctx.clone(),
            self.max_read_bytes,
            self.want_text.is_some(),
        );
        let mut easy = Easy2::new(collector);
        easy.url(self.url.as_str())?;
        easy.follow_location(true)?;
        easy.max_redirections(MAX_REDIRECTS)?;
        easy.accept_encoding("")?;
        easy.useragent(USER_AGENT)?;
        easy.progress(true)?;
        easy.timeout(ctx.timeout())?;

        let perform_result = easy.perform();
        let collector = easy.get_ref();
        if collector.cancelled {
            return Err(ProbeError::cancelled());
        }
        if let Err(err) = perform_result {
            let aborted_by_limit =
                collector.limit_reached && (err.is_write_error() || err.is_aborted_by_callback());
            if !aborted_by_limit {
                return Err(err.into());
            }
        }

        let status = easy.response_code()?;
        if status >= 400 {
            return Err(ProbeError::new(
                ProbeErrorKind::HttpStatus,
                format!("HTTP status {status} from {}", self.url),
            ));
        }

        if let Some(want) = &self.want_text
            && !body_contains(&collector.body, want)
        {
            return Err(ProbeError::new(
                ProbeErrorKind::UnexpectedBody,
                format!("body of {} does not contain {want:?}", self.url),
            ));
        }
        Ok(())
    }
}

impl From<HttpProbe> for ProbeClass {
    fn from(probe: HttpProbe) -> Self {
        ProbeClass::new(probe).with_class("http")
    }
}

struct BodyCollector {
    ctx: Context,
    bytes: u64,
    limit: u64,
    limit_reached: bool,
    capture: bool,
    body: Vec<u8>,
    cancelled: bool,
}

impl BodyCollector {
    fn new(ctx: Context, limit: u64, capture: bool) -> Self {
        Self {
            ctx,
            bytes: 0,
            limit,
            limit_reached: false,
            capture,
            body: Vec::new(),
            cancelled: false,
        }
    }
}

impl Handler for BodyCollector {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        let len = data.len() as u64;
        let take = if self.limit == 0 {
            len
        } else {
            let remaining = self.limit.saturating_sub(self.bytes);
            len.min(remaining)
        };

        if self.capture {
            self.body.extend_from_slice(&data[..take as usize]);
        }
        self.bytes = self.bytes.saturating_add(take);
        if self.limit > 0 && self.bytes >= self.limit {
            self.limit_reached = true;
        }

        Ok(data.len())
    }

    fn progress(&mut self, _dltotal: f64, dlnow: f64, _ultotal: f64, _ulnow: f64) -> bool {
        if self.ctx.is_cancelled() {
            self.cancelled = true;
            return false;
        }

        if self.limit == 0 {
            return true;
        }

        if self.limit_reached {
            return false;
        }

        if dlnow >= self.limit as f64 {
            self.limit_reached = true;
            return false;
        }

        true
    }
}

fn body_contains(body: &[u8], want: &str) -> bool {
    let want = want.as_bytes();
    want.is_empty() || body.windows(want.len()).any(|window| window == want)
}

impl From<CurlError> for ProbeError {
    fn from(err: CurlError) -> Self {
        let kind = if err.is_couldnt_resolve_host() || err.is_couldnt_resolve_proxy() {
            ProbeErrorKind::Dns
        } else if err.is_operation_timedout() {
            ProbeErrorKind::HttpTimeout
        } else if err.is_couldnt_connect() {
            ProbeErrorKind::ConnectOther
        } else if err.is_ssl_connect_error()
            || err.is_ssl_cacert()
            || err.is_ssl_certproblem()
            || err.is_ssl_cipher()
            || err.is_peer_failed_verification()
        {
            ProbeErrorKind::Tls
        } else if err.is_http_returned_error() {
            ProbeErrorKind::HttpStatus
        } else {
            ProbeErrorKind::Io
        };
        ProbeError::new(kind, err.to_string())
    }
}
