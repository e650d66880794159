//! Decides where the request checksum goes and applies it.

use super::{AsyncRequestStage, RequestStage};
use crate::checksum::chunked::{
    self, ChunkedContentProvider, AWS_CHUNKED, CONTENT_SHA256_HEADER,
    DECODED_CONTENT_LENGTH_HEADER, DEFAULT_ASYNC_CHUNK_SIZE, DEFAULT_CHUNK_SIZE,
    STREAMING_UNSIGNED_PAYLOAD_TRAILER, TRAILER_HEADER,
};
use crate::checksum::{ChecksumAlgorithm, ChecksumSpecs};
use crate::error::{ChecksumError, ClientError};
use crate::execution::attributes::{
    HTTP_CHECKSUM_REQUIRED, RESOLVED_CHECKSUM_SPECS, SIGNING_METHOD,
};
use crate::execution::ExecutionContext;
use crate::http::{HttpRequest, RequestBody, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_MD5};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

const CHECKSUM_HEADER_PREFIX: &str = "x-amz-checksum-";

/// Which execution model the stage serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientType {
    /// Blocking calls; payloads are [`RequestBody`] providers.
    Sync,
    /// Non-blocking calls; streaming payloads live on the context.
    Async,
}

/// Attaches at most one of `Content-MD5`, a flexible checksum header, or an
/// aws-chunked checksum trailer.
///
/// With a legacy signer (or none), the order of preference is MD5, then
/// trailer, then header. When a selected auth scheme signs the request, the
/// stage only resolves the algorithm and leaves placement to the signer,
/// except for non-blocking streaming payloads, which still get a trailer.
#[derive(Debug, Clone, Copy)]
pub struct HttpChecksumStage {
    client_type: ClientType,
}

impl HttpChecksumStage {
    /// Create the stage for one execution model.
    pub fn new(client_type: ClientType) -> Self {
        Self { client_type }
    }

    /// The execution model this stage serves.
    pub fn client_type(&self) -> ClientType {
        self.client_type
    }

    fn apply(&self, mut request: HttpRequest, context: &mut ExecutionContext) -> Result<HttpRequest> {
        if context.signing_mode().is_selected() {
            self.apply_for_selected_scheme(&mut request, context);
            return Ok(request);
        }

        let specs = context.attributes().get(RESOLVED_CHECKSUM_SPECS);

        if self.md5_required(&request, context, specs.as_ref())? {
            add_md5_header(&mut request, specs.as_ref())?;
            let resolved = specs.unwrap_or_default().with_default_algorithm();
            context.attributes_mut().put(RESOLVED_CHECKSUM_SPECS, resolved);
            return Ok(request);
        }

        let Some(specs) = specs else {
            return Ok(request);
        };

        if self.trailer_required(&request, context, &specs) {
            self.add_trailer(&mut request, context, &specs);
            return Ok(request);
        }

        if header_required(&request, context, &specs) {
            add_checksum_header(&mut request, &specs)?;
        }

        Ok(request)
    }

    fn apply_for_selected_scheme(&self, request: &mut HttpRequest, context: &mut ExecutionContext) {
        if !calculation_needed(request, context) {
            return;
        }

        let mut specs = context
            .attributes()
            .get(RESOLVED_CHECKSUM_SPECS)
            .unwrap_or_default();
        if specs.algorithm.is_none() {
            specs = specs.with_default_algorithm();
            if let (Some(header), Some(algorithm)) = (&specs.request_algorithm_header, specs.algorithm) {
                request.put_header(header.clone(), algorithm.id());
            }
        }
        context.attributes_mut().put(RESOLVED_CHECKSUM_SPECS, specs.clone());

        if self.client_type == ClientType::Async
            && context.request_provider().is_some()
            && specs.is_request_streaming
            && is_unsigned_payload(context)
        {
            self.add_trailer(request, context, &specs);
        }
    }

    fn md5_required(
        &self,
        request: &HttpRequest,
        context: &ExecutionContext,
        specs: Option<&ChecksumSpecs>,
    ) -> Result<bool> {
        let trait_present = context
            .attributes()
            .get(HTTP_CHECKSUM_REQUIRED)
            .unwrap_or(false)
            || specs
                .map(|s| s.algorithm.is_none() && s.is_request_checksum_required)
                .unwrap_or(false);

        if !trait_present || request.has_header(CONTENT_MD5) {
            return Ok(false);
        }

        if context.request_provider().is_some() {
            return Err(ClientError::Md5ForNonBlockingContent.into());
        }

        Ok(request.body.is_some())
    }

    fn has_body(&self, request: &HttpRequest, context: &ExecutionContext) -> bool {
        match self.client_type {
            ClientType::Sync => request.body.is_some(),
            ClientType::Async => context.request_provider().is_some(),
        }
    }

    fn trailer_required(
        &self,
        request: &HttpRequest,
        context: &ExecutionContext,
        specs: &ChecksumSpecs,
    ) -> bool {
        let Some(header_name) = specs.header_name.as_deref() else {
            return false;
        };
        specs.algorithm.is_some()
            && specs.is_request_streaming
            && self.has_body(request, context)
            && !request.has_header(header_name)
            && is_unsigned_payload(context)
    }

    fn add_trailer(&self, request: &mut HttpRequest, context: &mut ExecutionContext, specs: &ChecksumSpecs) {
        let (Some(algorithm), Some(header_name)) = (specs.algorithm, specs.header_name.clone()) else {
            return;
        };

        let (original_length, chunk_size) = match self.client_type {
            ClientType::Sync => {
                let Some(body) = request.body.take() else {
                    return;
                };
                let original_length = body.content_length().unwrap_or(0);
                let encoded_length = chunked::encoded_content_length(
                    original_length,
                    DEFAULT_CHUNK_SIZE,
                    algorithm,
                    &header_name,
                );
                let provider = ChunkedContentProvider::new(
                    body.provider().clone(),
                    algorithm,
                    header_name.clone(),
                    DEFAULT_CHUNK_SIZE,
                );
                request.body = Some(RequestBody::from_provider(
                    Arc::new(provider),
                    Some(encoded_length),
                ));
                (original_length, DEFAULT_CHUNK_SIZE)
            }
            ClientType::Async => {
                let Some(provider) = context.request_provider().cloned() else {
                    return;
                };
                let original_length = request
                    .get_header(CONTENT_LENGTH)
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .or_else(|| provider.content_length())
                    .unwrap_or(0);
                let encoded_length = chunked::encoded_content_length(
                    original_length,
                    DEFAULT_ASYNC_CHUNK_SIZE,
                    algorithm,
                    &header_name,
                );
                let trailer_name = header_name.clone();
                let wrapped = provider.map_stream(Some(encoded_length), move |stream| {
                    chunked::chunked_body_stream(stream, algorithm, &trailer_name, DEFAULT_ASYNC_CHUNK_SIZE)
                });
                context.set_request_provider(Some(wrapped));
                (original_length, DEFAULT_ASYNC_CHUNK_SIZE)
            }
        };

        let content_length =
            chunked::encoded_content_length(original_length, chunk_size, algorithm, &header_name);

        request.remove_header(CONTENT_MD5);
        request.remove_header(&header_name);
        set_request_algorithm_header(request, specs, algorithm);
        request.put_header(TRAILER_HEADER, header_name.clone());
        request.append_header(CONTENT_ENCODING, AWS_CHUNKED);
        request.put_header(CONTENT_SHA256_HEADER, STREAMING_UNSIGNED_PAYLOAD_TRAILER);
        request.put_header(DECODED_CONTENT_LENGTH_HEADER, original_length.to_string());
        request.put_header(CONTENT_LENGTH, content_length.to_string());

        trace!(
            algorithm = %algorithm,
            decoded_length = original_length,
            content_length,
            "Checksum placed in aws-chunked trailer"
        );
    }
}

impl RequestStage<HttpRequest, HttpRequest> for HttpChecksumStage {
    fn execute(&self, input: HttpRequest, context: &mut ExecutionContext) -> Result<HttpRequest> {
        self.apply(input, context)
    }
}

#[async_trait]
impl AsyncRequestStage<HttpRequest, HttpRequest> for HttpChecksumStage {
    async fn execute(&self, input: HttpRequest, context: &mut ExecutionContext) -> Result<HttpRequest> {
        self.apply(input, context)
    }
}

fn is_unsigned_payload(context: &ExecutionContext) -> bool {
    context
        .attributes()
        .get(SIGNING_METHOD)
        .map(|method| method.is_unsigned_payload())
        .unwrap_or(true)
}

fn calculation_needed(request: &HttpRequest, context: &ExecutionContext) -> bool {
    let already_present = request
        .headers
        .keys()
        .any(|name| name.to_ascii_lowercase().starts_with(CHECKSUM_HEADER_PREFIX));
    if already_present {
        return false;
    }

    let legacy_required = context.attributes().get(HTTP_CHECKSUM_REQUIRED).unwrap_or(false);
    let specs_need_it = context
        .attributes()
        .get(RESOLVED_CHECKSUM_SPECS)
        .map(|s| s.algorithm.is_some() || s.is_request_checksum_required)
        .unwrap_or(false);
    legacy_required || specs_need_it
}

fn header_required(request: &HttpRequest, context: &ExecutionContext, specs: &ChecksumSpecs) -> bool {
    let Some(header_name) = specs.header_name.as_deref() else {
        return false;
    };
    request.body.is_some()
        && specs.algorithm.is_some()
        && !request.has_header(header_name)
        && is_unsigned_payload(context)
        && !specs.is_request_streaming
}

fn add_md5_header(request: &mut HttpRequest, specs: Option<&ChecksumSpecs>) -> Result<()> {
    let Some(body) = request.body.as_ref() else {
        return Ok(());
    };
    let mut stream = body.new_stream().map_err(ChecksumError::from)?;
    let md5 = ChecksumAlgorithm::Md5.digest_reader_base64(&mut stream)?;

    if let Some(header_name) = specs.and_then(|s| s.header_name.as_deref()) {
        request.remove_header(header_name);
    }
    request.remove_header(TRAILER_HEADER);
    request.put_header(CONTENT_MD5, md5);
    trace!("Checksum placed in Content-MD5 header");
    Ok(())
}

fn add_checksum_header(request: &mut HttpRequest, specs: &ChecksumSpecs) -> Result<()> {
    let (Some(algorithm), Some(header_name)) = (specs.algorithm, specs.header_name.as_deref()) else {
        return Ok(());
    };
    let Some(body) = request.body.as_ref() else {
        return Ok(());
    };
    let mut stream = body.new_stream().map_err(ChecksumError::from)?;
    let value = algorithm.digest_reader_base64(&mut stream)?;

    request.remove_header(CONTENT_MD5);
    request.remove_header(TRAILER_HEADER);
    set_request_algorithm_header(request, specs, algorithm);
    request.put_header(header_name.to_string(), value);
    trace!(algorithm = %algorithm, header = header_name, "Checksum placed in header");
    Ok(())
}

fn set_request_algorithm_header(request: &mut HttpRequest, specs: &ChecksumSpecs, algorithm: ChecksumAlgorithm) {
    if let Some(header) = &specs.request_algorithm_header {
        request.put_header(header.clone(), algorithm.id());
    }
}
