//! Wrapper plugin bridge.
//!
//! When protoc invokes this binary as `protoc-gen-<name>`, the
//! `CodeGeneratorRequest` arrives on stdin with a `__wrapper=<name>` token
//! smuggled into the request parameter. The bridge strips the token, finds
//! the matching plugin config, and pipes the cleaned request into the
//! configured shell command or Docker container, which writes its
//! `CodeGeneratorResponse` to stdout untouched.

use std::env;
use std::io::Write;
use std::process::Stdio;

use bytes::BytesMut;
use log::info;
use prost::Message;
use prost_types::compiler::CodeGeneratorRequest;

use crate::config::{Config, Plugin};
use crate::error::{Error, Result};
use crate::shell;

/// True when this process was started as a protoc plugin: no CLI arguments
/// and stdin is a pipe rather than a terminal.
pub fn is_plugin_mode() -> bool {
    !atty::is(atty::Stream::Stdin) && env::args().len() <= 1
}

/// Decode the request, extract the wrapper token, and dispatch.
pub fn run(config: &Config, input: &[u8]) -> Result<()> {
    if input.is_empty() {
        return Err(Error::Bridge("empty code generator request".into()));
    }

    let mut request = CodeGeneratorRequest::decode(input)
        .map_err(|err| Error::Bridge(format!("malformed code generator request: {err}")))?;

    let parameter = request.parameter.clone().unwrap_or_default();
    let (wrapper, rest) = split_wrapper_param(&parameter);
    let Some(name) = wrapper else {
        return Err(Error::Bridge(
            "request carries no __wrapper parameter".into(),
        ));
    };
    request.parameter = rest;

    execute_wrapper(config, &name, &request)
}

/// Split the protoc parameter string into the wrapper plugin name and the
/// remaining comma-separated options.
fn split_wrapper_param(parameter: &str) -> (Option<String>, Option<String>) {
    let mut wrapper = None;
    let mut kept = Vec::new();

    for part in parameter.split(',') {
        match part.split_once('=') {
            Some(("__wrapper", value)) => wrapper = Some(value.trim().to_string()),
            _ if part.is_empty() => {}
            _ => kept.push(part),
        }
    }

    let rest = (!kept.is_empty()).then(|| kept.join(","));
    (wrapper, rest)
}

/// Pipe the cleaned request into the configured wrapper command. An unknown
/// plugin name is not an error; protoc simply gets no response content.
fn execute_wrapper(config: &Config, name: &str, request: &CodeGeneratorRequest) -> Result<()> {
    let Some(plugin) = find_plugin(config, name) else {
        info!("no wrapper plugin named {name} configured");
        return Ok(());
    };

    let mut payload = BytesMut::with_capacity(request.encoded_len());
    request
        .encode(&mut payload)
        .map_err(|err| Error::Bridge(format!("re-encoding request failed: {err}")))?;

    let mut cmd = if !plugin.shell.is_empty() {
        shell::shell(plugin.shell.trim())
    } else {
        shell::shell(&format!("docker run -i --rm {}", plugin.docker.trim()))
    };

    let mut child = cmd.stdin(Stdio::piped()).spawn()?;
    if let Some(stdin) = child.stdin.as_mut() {
        stdin.write_all(&payload)?;
    }
    drop(child.stdin.take());

    let status = child.wait()?;
    if !status.success() {
        return Err(Error::Bridge(format!(
            "wrapper plugin {name} exited with {status}"
        )));
    }
    Ok(())
}

fn find_plugin<'a>(config: &'a Config, name: &str) -> Option<&'a Plugin> {
    config
        .plugins
        .iter()
        .find(|p| p.name == name && p.is_wrapper())
}
