use crate::cancel::CancellationToken;
use crate::cluster::{
    CapabilityLister, ConfigSource, CustomResourceType, LogSource, WorkloadKind, WorkloadLookup,
    WorkloadSummary,
};
use crate::error::CollaboratorError;
use crate::settings::ClusterSettings;
use log::debug;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::{ErrorKind, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// How often a running request checks its pipes, deadline and cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Cluster collaborator backed by the `kubectl` command line client
///
/// Every request runs one short-lived `kubectl` subprocess. The subprocess is
/// killed when the request times out or the caller's token fires.
#[derive(Debug, Clone)]
pub struct KubectlClient {
    binary: String,
    context: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ConfigMapObject {
    #[serde(default)]
    data: BTreeMap<String, String>,
}

/// `kubectl get <resource> -o json` list of pods, workloads or custom resources
#[derive(Debug, Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectItem>,
}

#[derive(Debug, Deserialize)]
struct ObjectItem {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: WorkloadSpec,
    #[serde(default)]
    status: WorkloadStatus,
}

#[derive(Debug, Deserialize)]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkloadSpec {
    #[serde(default)]
    template: PodTemplate,
}

#[derive(Debug, Default, Deserialize)]
struct PodTemplate {
    #[serde(default)]
    spec: PodSpec,
}

#[derive(Debug, Default, Deserialize)]
struct PodSpec {
    #[serde(default)]
    containers: Vec<Container>,
}

#[derive(Debug, Deserialize)]
struct Container {
    #[serde(default)]
    image: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkloadStatus {
    /// Reported by DaemonSets
    #[serde(default)]
    number_ready: u32,
    /// Reported by Deployments and StatefulSets
    #[serde(default)]
    ready_replicas: u32,
}

impl ObjectItem {
    fn into_summary(self) -> WorkloadSummary {
        WorkloadSummary {
            name: self.metadata.name,
            namespace: self.metadata.namespace,
            labels: self.metadata.labels,
            images: self
                .spec
                .template
                .spec
                .containers
                .into_iter()
                .map(|c| c.image)
                .collect(),
            ready_pods: self.status.number_ready.max(self.status.ready_replicas),
        }
    }
}

enum ReadOutcome {
    Data,
    Pending,
    Eof,
}

impl KubectlClient {
    /// Create a client running `binary`, optionally pinned to a kube context
    pub fn new(binary: impl Into<String>, context: Option<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            context,
            timeout,
        }
    }

    /// `kubectl` from `PATH`, current context, 10 second requests
    pub fn with_defaults() -> Self {
        Self::from_settings(&ClusterSettings::default())
    }

    pub fn from_settings(settings: &ClusterSettings) -> Self {
        Self::new(
            settings.kubectl.clone(),
            settings.context().map(str::to_string),
            settings.request_timeout(),
        )
    }

    /// Run one kubectl request and return its stdout
    fn run(&self, args: &[&str], cancel: &CancellationToken) -> Result<String, CollaboratorError> {
        if cancel.is_cancelled() {
            return Err(CollaboratorError::Cancelled);
        }

        let deadline = Instant::now() + self.timeout;
        let mut child = self.spawn(args)?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| CollaboratorError::SpawnFailed("No stdout available".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| CollaboratorError::SpawnFailed("No stderr available".to_string()))?;

        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut out_open = true;
        let mut err_open = true;
        let mut buffer = [0u8; 8192];

        while out_open || err_open {
            self.interrupt_if_needed(&mut child, cancel, deadline)?;

            let mut progressed = false;
            if out_open {
                match read_chunk(&mut stdout, &mut buffer, &mut out) {
                    Ok(ReadOutcome::Data) => progressed = true,
                    Ok(ReadOutcome::Eof) => out_open = false,
                    Ok(ReadOutcome::Pending) => {}
                    Err(e) => return Err(self.terminate(&mut child, e)),
                }
            }
            if err_open {
                match read_chunk(&mut stderr, &mut buffer, &mut err) {
                    Ok(ReadOutcome::Data) => progressed = true,
                    Ok(ReadOutcome::Eof) => err_open = false,
                    Ok(ReadOutcome::Pending) => {}
                    Err(e) => return Err(self.terminate(&mut child, e)),
                }
            }

            if !progressed {
                thread::sleep(POLL_INTERVAL);
            }
        }

        let status = self.wait_for_exit(&mut child, cancel, deadline)?;
        let stderr_text = String::from_utf8_lossy(&err);

        if status.success() {
            Ok(String::from_utf8_lossy(&out).into_owned())
        } else {
            Err(classify_failure(&stderr_text, status))
        }
    }

    fn spawn(&self, args: &[&str]) -> Result<Child, CollaboratorError> {
        let mut command = Command::new(&self.binary);
        if let Some(context) = &self.context {
            command.args(["--context", context.as_str()]);
        }
        command.args(args);

        debug!("Running {} {}", self.binary, args.join(" "));

        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CollaboratorError::SpawnFailed(format!("{}: {}", self.binary, e)))?;

        // Non-blocking pipes let the read loop notice cancellation and timeouts
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            if let Some(stdout) = &child.stdout {
                set_nonblocking(stdout.as_raw_fd());
            }
            if let Some(stderr) = &child.stderr {
                set_nonblocking(stderr.as_raw_fd());
            }
        }

        Ok(child)
    }

    fn wait_for_exit(
        &self,
        child: &mut Child,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<ExitStatus, CollaboratorError> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(e) => return Err(self.terminate(child, CollaboratorError::Io(e))),
            }
            self.interrupt_if_needed(child, cancel, deadline)?;
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Kill the child and fail if the caller cancelled or the deadline passed
    fn interrupt_if_needed(
        &self,
        child: &mut Child,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<(), CollaboratorError> {
        let error = if cancel.is_cancelled() {
            CollaboratorError::Cancelled
        } else if Instant::now() >= deadline {
            CollaboratorError::Timeout(self.timeout)
        } else {
            return Ok(());
        };

        Err(self.terminate(child, error))
    }

    /// Kill and reap the child, handing back the error that ended the request
    fn terminate(&self, child: &mut Child, error: CollaboratorError) -> CollaboratorError {
        debug!("Terminating {} subprocess: {}", self.binary, error);
        let _ = child.kill();
        let _ = child.wait();
        error
    }

    /// Everything `kubectl get <resource>` lists in `namespace`, or in every
    /// namespace when it is empty
    fn list(
        &self,
        resource: &str,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkloadSummary>, CollaboratorError> {
        let mut args = vec!["get", resource, "-o", "json"];
        if namespace.is_empty() {
            args.push("--all-namespaces");
        } else {
            args.extend(["-n", namespace]);
        }

        let output = self.run(&args, cancel)?;
        let list: ObjectList = serde_json::from_str(&output)
            .map_err(|e| CollaboratorError::InvalidResponse(format!("{} list: {}", resource, e)))?;
        Ok(list.items.into_iter().map(ObjectItem::into_summary).collect())
    }

    /// `Ok(true)` when `kubectl get` finds the object, `Ok(false)` when it is absent
    fn exists(
        &self,
        resource: &str,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, CollaboratorError> {
        match self.run(&["get", resource, name, "-n", namespace, "-o", "name"], cancel) {
            Ok(output) => Ok(!output.trim().is_empty()),
            Err(CollaboratorError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl WorkloadLookup for KubectlClient {
    fn workload_exists(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, CollaboratorError> {
        self.exists(kind.resource(), namespace, name, cancel)
    }

    fn custom_resource_exists(
        &self,
        resource_type: CustomResourceType,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, CollaboratorError> {
        self.exists(&resource_type.qualified_name(), namespace, name, cancel)
    }

    fn list_workloads(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkloadSummary>, CollaboratorError> {
        self.list(kind.resource(), namespace, cancel)
    }

    fn list_custom_resources(
        &self,
        resource_type: CustomResourceType,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkloadSummary>, CollaboratorError> {
        self.list(&resource_type.qualified_name(), namespace, cancel)
    }
}

impl CapabilityLister for KubectlClient {
    fn list_kinds(&self, cancel: &CancellationToken) -> Result<Vec<String>, CollaboratorError> {
        let output = self.run(&["api-resources", "--no-headers"], cancel)?;
        Ok(parse_api_resource_kinds(&output))
    }
}

impl ConfigSource for KubectlClient {
    fn config_map_data(
        &self,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, String>, CollaboratorError> {
        let output = self.run(
            &["get", "configmap", name, "-n", namespace, "-o", "json"],
            cancel,
        )?;
        let object: ConfigMapObject = serde_json::from_str(&output).map_err(|e| {
            CollaboratorError::InvalidResponse(format!(
                "configmap {}/{}: {}",
                namespace, name, e
            ))
        })?;
        Ok(object.data)
    }
}

impl LogSource for KubectlClient {
    fn tail_logs(
        &self,
        namespace: &str,
        pod: &str,
        lines: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, CollaboratorError> {
        let tail = format!("--tail={}", lines);
        let output = self.run(&["logs", pod, "-n", namespace, tail.as_str()], cancel)?;
        Ok(output.lines().map(str::to_string).collect())
    }

    fn find_pods(
        &self,
        namespace: &str,
        selector: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, CollaboratorError> {
        let output = self.run(
            &["get", "pods", "-n", namespace, "-l", selector, "-o", "json"],
            cancel,
        )?;
        let list: ObjectList = serde_json::from_str(&output)
            .map_err(|e| CollaboratorError::InvalidResponse(format!("pod list: {}", e)))?;
        Ok(list.items.into_iter().map(|item| item.metadata.name).collect())
    }
}

fn read_chunk(
    reader: &mut impl Read,
    buffer: &mut [u8],
    sink: &mut Vec<u8>,
) -> Result<ReadOutcome, CollaboratorError> {
    match reader.read(buffer) {
        Ok(0) => Ok(ReadOutcome::Eof),
        Ok(n) => {
            sink.extend_from_slice(&buffer[..n]);
            Ok(ReadOutcome::Data)
        }
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
            Ok(ReadOutcome::Pending)
        }
        Err(e) => Err(CollaboratorError::Io(e)),
    }
}

#[cfg(unix)]
fn set_nonblocking(fd: std::os::unix::io::RawFd) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
    }
}

/// Map a failed request's stderr onto the collaborator error kinds
fn classify_failure(stderr: &str, status: ExitStatus) -> CollaboratorError {
    let message = stderr.trim();
    let lower = message.to_lowercase();

    if message.is_empty() {
        CollaboratorError::CommandFailed(format!("kubectl exited with {}", status))
    } else if lower.contains("(notfound)")
        || lower.contains("not found")
        || lower.contains("doesn't have a resource type")
    {
        CollaboratorError::NotFound(message.to_string())
    } else if lower.contains("(forbidden)") || lower.contains("forbidden") {
        CollaboratorError::Forbidden(message.to_string())
    } else {
        CollaboratorError::CommandFailed(message.to_string())
    }
}

/// Kinds from `kubectl api-resources --no-headers`
///
/// KIND is the last column; SHORTNAMES may be blank, so columns are not
/// counted from the left.
fn parse_api_resource_kinds(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().last())
        .map(str::to_string)
        .collect()
}
