use crate::config::ParameterDefaults;
use crate::extractor::UploadRequest;
use url::Url;

pub const CONF: &str = "conf";
pub const IMGSZ: &str = "imgsz";
pub const RETURN_IMAGE: &str = "return_image";

/// Query parameters sent along with the forwarded file.
///
/// Values are opaque strings, the inference service does its own validation.
#[derive(Clone, Debug, PartialEq)]
pub struct RelayParameters {
    pub conf: String,
    pub imgsz: String,
    pub return_image: String,
}

impl RelayParameters {
    /// Resolves each parameter from the form fields, then the inbound query
    /// string, then the configured defaults. Empty values count as missing.
    pub fn resolve(
        upload: &UploadRequest,
        inbound_query: Option<&str>,
        defaults: &ParameterDefaults,
    ) -> Self {
        let pick = |name: &str, default: &str| {
            upload
                .field(name)
                .map(str::to_string)
                .or_else(|| query_value(inbound_query, name))
                .unwrap_or_else(|| default.to_string())
        };

        RelayParameters {
            conf: pick(CONF, &defaults.conf),
            imgsz: pick(IMGSZ, &defaults.imgsz),
            return_image: pick(RETURN_IMAGE, &defaults.return_image),
        }
    }

    /// Appends the parameters to `url`, replacing any query it had.
    pub fn apply(&self, url: &mut Url) {
        url.query_pairs_mut()
            .clear()
            .append_pair(RETURN_IMAGE, &self.return_image)
            .append_pair(CONF, &self.conf)
            .append_pair(IMGSZ, &self.imgsz);
    }
}

fn query_value(query: Option<&str>, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, value)| key == name && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}
