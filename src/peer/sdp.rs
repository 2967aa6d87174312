//! Codec restriction applied to host offers before they leave the host.

/// Attribute kinds keyed by payload type, e.g. `a=rtpmap:96 VP8/90000`.
const PAYLOAD_ATTRIBUTES: [&str; 3] = ["a=rtpmap:", "a=fmtp:", "a=rtcp-fb:"];

/// Restricts the video section of an SDP to a fixed set of payload types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecFilter {
    allowed: Vec<u8>,
}

impl CodecFilter {
    pub fn new(allowed: impl Into<Vec<u8>>) -> Self {
        Self {
            allowed: allowed.into(),
        }
    }

    pub fn allowed(&self) -> &[u8] {
        &self.allowed
    }

    /// Rewrites `m=video` to declare only the allowed payloads (port and
    /// protocol kept) and drops payload-keyed attributes for anything else
    /// inside that section. All other lines pass through in order.
    pub fn apply(&self, sdp: &str) -> String {
        let mut out = Vec::new();
        let mut in_video = false;

        for line in sdp.split("\r\n") {
            if line.starts_with("m=") {
                in_video = line.starts_with("m=video");
                if in_video {
                    out.push(self.rewrite_media_line(line));
                    continue;
                }
            }

            if in_video {
                if let Some(pt) = attribute_payload(line) {
                    if !self.allowed.contains(&pt) {
                        continue;
                    }
                }
            }
            out.push(line.to_string());
        }

        out.join("\r\n")
    }

    fn rewrite_media_line(&self, line: &str) -> String {
        // m=<media> <port> <proto> <fmt> ...
        let mut fields = line.split(' ');
        let head: Vec<&str> = fields.by_ref().take(3).collect();
        if head.len() < 3 {
            return line.to_string();
        }

        let mut rewritten = head.join(" ");
        for pt in &self.allowed {
            rewritten.push(' ');
            rewritten.push_str(&pt.to_string());
        }
        rewritten
    }
}

/// Payload type referenced by an rtpmap/fmtp/rtcp-fb line, if any.
/// `a=rtcp-fb:*` applies to every payload and is not keyed.
fn attribute_payload(line: &str) -> Option<u8> {
    let rest = PAYLOAD_ATTRIBUTES
        .iter()
        .find_map(|prefix| line.strip_prefix(prefix))?;
    let digits: &str = rest.split(|c: char| !c.is_ascii_digit()).next()?;
    digits.parse().ok()
}

/// Payload types declared on the `m=video` line.
pub fn video_payloads(sdp: &str) -> Vec<u8> {
    sdp.split("\r\n")
        .find(|line| line.starts_with("m=video"))
        .map(|line| line.split(' ').skip(3).filter_map(|pt| pt.parse().ok()).collect())
        .unwrap_or_default()
}

/// Payload types referenced anywhere inside the video section.
pub fn video_section_payloads(sdp: &str) -> Vec<u8> {
    let mut payloads = Vec::new();
    let mut in_video = false;
    for line in sdp.split("\r\n") {
        if line.starts_with("m=") {
            in_video = line.starts_with("m=video");
            if in_video {
                payloads.extend(video_payloads(line));
            }
            continue;
        }
        if in_video {
            if let Some(pt) = attribute_payload(line) {
                if !payloads.contains(&pt) {
                    payloads.push(pt);
                }
            }
        }
    }
    payloads
}
