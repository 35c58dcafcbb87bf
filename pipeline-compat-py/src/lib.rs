//! Python bindings for pipeline-compat.
//!
//! Exposes the legacy `taskqueue`, `users` and storage call surface so that
//! existing Python call sites keep working unchanged. The process holds one
//! shared context: configuration read from the environment at import, the
//! in-memory backend used in test mode, and a tokio runtime that blocking
//! calls run on.

use base64::Engine;
use chrono::{DateTime, NaiveDateTime, Utc};
use http::{HeaderMap, HeaderName, HeaderValue};
use pyo3::create_exception;
use pyo3::exceptions::{PyException, PyTypeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{IntoPyDict, PyBytes, PyDict, PyList};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, OnceLock};
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::debug;

use pipeline_compat::auth::MetadataServerTokenProvider;
use pipeline_compat::config::CompatConfig;
use pipeline_compat::errors::CompatError;
use pipeline_compat::identity::{
    create_login_url as login_url, create_logout_url as logout_url, HeaderClaimsProvider,
    IdentityClaim, RequestIdentity,
};
use pipeline_compat::observability::init_logging;
use pipeline_compat::storage::{BlobStore, BucketResolver, GcsBlobStore, InMemoryBlobStore};
use pipeline_compat::taskqueue::{
    eta_from_local, CloudTasksBackend, HttpMethod, InMemoryTaskBackend, RecordedTask, SubmissionResult,
    SubmitOptions, Task, TaskDispatcher, DEFAULT_QUEUE,
};

create_exception!(pipeline_compat_py, Error, PyException, "Base taskqueue error type.");
create_exception!(
    pipeline_compat_py,
    TaskAlreadyExistsError,
    Error,
    "Task with the same name already exists."
);
create_exception!(
    pipeline_compat_py,
    TombstonedTaskError,
    Error,
    "Task name has been tombstoned (task was recently deleted or completed)."
);

/// State shared by every call in the process.
struct ProcessContext {
    config: CompatConfig,
    test_mode: AtomicBool,
    memory_tasks: Arc<InMemoryTaskBackend>,
    memory_blobs: Arc<InMemoryBlobStore>,
    bucket: Arc<BucketResolver>,
    claims: HeaderClaimsProvider,
    live_dispatcher: OnceLock<Result<TaskDispatcher, CompatError>>,
    live_blobs: OnceLock<Result<Arc<GcsBlobStore>, CompatError>>,
}

impl ProcessContext {
    fn from_env() -> Self {
        let config = CompatConfig::from_env();
        let bucket = Arc::new(BucketResolver::new(&config.storage));
        let claims = HeaderClaimsProvider::with_headers(config.identity.clone());
        Self {
            config,
            test_mode: AtomicBool::new(false),
            memory_tasks: Arc::new(InMemoryTaskBackend::new()),
            memory_blobs: Arc::new(InMemoryBlobStore::default()),
            bucket,
            claims,
            live_dispatcher: OnceLock::new(),
            live_blobs: OnceLock::new(),
        }
    }

    fn test_mode(&self) -> bool {
        self.test_mode.load(Ordering::SeqCst)
    }

    fn dispatcher(&self) -> PyResult<TaskDispatcher> {
        if self.test_mode() {
            return Ok(TaskDispatcher::new(self.memory_tasks.clone()));
        }
        self.live_dispatcher
            .get_or_init(|| {
                CloudTasksBackend::with_metadata_server(self.config.cloud_tasks.clone())
                    .map(|backend| TaskDispatcher::new(Arc::new(backend)))
            })
            .clone()
            .map_err(to_py_err)
    }

    fn blob_store(&self) -> PyResult<Arc<dyn BlobStore>> {
        if self.test_mode() {
            let store: Arc<dyn BlobStore> = self.memory_blobs.clone();
            return Ok(store);
        }
        let store: Arc<dyn BlobStore> = self
            .live_blobs
            .get_or_init(|| {
                let tokens = MetadataServerTokenProvider::new()?;
                GcsBlobStore::new(
                    self.config.storage.clone(),
                    self.bucket.clone(),
                    Arc::new(tokens),
                )
                .map(Arc::new)
            })
            .clone()
            .map_err(to_py_err)?;
        Ok(store)
    }
}

static CONTEXT: LazyLock<ProcessContext> = LazyLock::new(ProcessContext::from_env);
static RUNTIME: OnceLock<Runtime> = OnceLock::new();

fn runtime() -> PyResult<&'static Runtime> {
    if let Some(rt) = RUNTIME.get() {
        return Ok(rt);
    }
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::new_err(format!("failed to start runtime: {e}")))?;
    Ok(RUNTIME.get_or_init(|| rt))
}

fn to_py_err(err: CompatError) -> PyErr {
    match err {
        CompatError::Validation(_) => PyValueError::new_err(err.to_string()),
        other => Error::new_err(other.to_string()),
    }
}

fn dedup_to_py_err(result: &SubmissionResult, queue_name: &str) -> Option<PyErr> {
    match result {
        SubmissionResult::Enqueued { .. } => None,
        SubmissionResult::AlreadyExists { task_name } => Some(TaskAlreadyExistsError::new_err(
            format!("Task already exists: {task_name} in queue {queue_name}"),
        )),
        SubmissionResult::Tombstoned { task_name } => Some(TombstonedTaskError::new_err(format!(
            "Task name tombstoned: {task_name} in queue {queue_name}"
        ))),
    }
}

/// Extracts an ETA. Aware datetimes are converted through their own
/// `utcoffset()`; naive ones are taken as UTC.
fn extract_eta(value: &Bound<'_, PyAny>) -> PyResult<DateTime<Utc>> {
    if let Ok(naive) = value.extract::<NaiveDateTime>() {
        return Ok(naive.and_utc());
    }
    let offset = value
        .call_method0("utcoffset")
        .and_then(|offset| offset.extract::<chrono::Duration>())
        .map_err(|_| PyTypeError::new_err("eta must be a datetime"))?;
    let py = value.py();
    let kwargs = [("tzinfo", py.None())].into_py_dict_bound(py);
    let local: NaiveDateTime = value.call_method("replace", (), Some(&kwargs))?.extract()?;
    eta_from_local(local, offset).map_err(|e| to_py_err(e.into()))
}

fn py_value_to_string(value: &Bound<'_, PyAny>) -> PyResult<String> {
    if let Ok(s) = value.extract::<String>() {
        return Ok(s);
    }
    Ok(value.str()?.to_string())
}

/// Legacy task descriptor.
#[pyclass(name = "Task")]
#[derive(Clone)]
pub struct PyTask {
    inner: Task,
}

#[pymethods]
impl PyTask {
    #[new]
    #[pyo3(signature = (url=None, params=None, name=None, method="POST", headers=None, countdown=None, eta=None, **_kwargs))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        url: Option<String>,
        params: Option<&Bound<'_, PyDict>>,
        name: Option<String>,
        method: &str,
        headers: Option<HashMap<String, String>>,
        countdown: Option<f64>,
        eta: Option<&Bound<'_, PyAny>>,
        _kwargs: Option<&Bound<'_, PyDict>>,
    ) -> PyResult<Self> {
        let method: HttpMethod = method.parse().map_err(|e| PyValueError::new_err(format!("{e}")))?;
        let mut inner = Task {
            url,
            method,
            name,
            ..Task::default()
        };

        if let Some(params) = params {
            for (key, value) in params.iter() {
                let key = py_value_to_string(&key)?;
                if let Ok(list) = value.downcast::<PyList>() {
                    for item in list.iter() {
                        inner.params.push((key.clone(), py_value_to_string(&item)?));
                    }
                } else {
                    inner.params.push((key, py_value_to_string(&value)?));
                }
            }
        }
        if let Some(headers) = headers {
            inner.headers.extend(headers);
        }
        if let Some(seconds) = countdown {
            let countdown = Duration::try_from_secs_f64(seconds)
                .map_err(|e| PyValueError::new_err(format!("invalid countdown: {e}")))?;
            inner.countdown = Some(countdown);
        }
        if let Some(eta) = eta {
            inner.eta = Some(extract_eta(eta)?);
        }

        Ok(Self { inner })
    }

    /// Adds this task to `queue_name`.
    #[pyo3(signature = (queue_name=DEFAULT_QUEUE, transactional=false))]
    fn add(&self, py: Python<'_>, queue_name: &str, transactional: bool) -> PyResult<String> {
        let dispatcher = CONTEXT.dispatcher()?;
        let rt = runtime()?;
        let options = SubmitOptions::new().with_transactional(transactional);
        let task = self.inner.clone();
        let queue = queue_name.to_string();

        let result = py
            .allow_threads(|| rt.block_on(dispatcher.submit_with(&task, &queue, options)))
            .map_err(to_py_err)?;

        match dedup_to_py_err(&result, queue_name) {
            Some(err) => Err(err),
            None => Ok(result.task_name().to_string()),
        }
    }

    #[getter]
    fn url(&self) -> Option<String> {
        self.inner.url.clone()
    }

    #[getter]
    fn name(&self) -> Option<String> {
        self.inner.name.clone()
    }

    #[getter]
    fn method(&self) -> &'static str {
        self.inner.method.as_str()
    }

    #[getter]
    fn payload(&self) -> String {
        self.inner.encoded_params()
    }

    #[getter]
    fn headers(&self) -> HashMap<String, String> {
        self.inner.delivery_headers().into_iter().collect()
    }

    fn __repr__(&self) -> String {
        format!(
            "Task(url={:?}, name={:?}, method='{}')",
            self.inner.url, self.inner.name, self.inner.method
        )
    }
}

/// Legacy queue handle.
#[pyclass(name = "Queue")]
#[derive(Clone)]
pub struct PyQueue {
    name: String,
}

#[pymethods]
impl PyQueue {
    #[new]
    #[pyo3(signature = (name=DEFAULT_QUEUE))]
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    #[getter]
    fn name(&self) -> &str {
        &self.name
    }

    /// Adds a task or a list of tasks.
    ///
    /// Tasks are submitted in order; the first duplicate raises and the
    /// remaining tasks are not submitted.
    fn add(&self, py: Python<'_>, task_or_tasks: &Bound<'_, PyAny>) -> PyResult<()> {
        let tasks: Vec<Task> = if let Ok(task) = task_or_tasks.extract::<PyRef<'_, PyTask>>() {
            vec![task.inner.clone()]
        } else {
            let list = task_or_tasks.downcast::<PyList>()?;
            list.iter()
                .map(|item| item.extract::<PyRef<'_, PyTask>>().map(|t| t.inner.clone()))
                .collect::<PyResult<_>>()?
        };

        let dispatcher = CONTEXT.dispatcher()?;
        let rt = runtime()?;
        for task in &tasks {
            let result = py
                .allow_threads(|| rt.block_on(dispatcher.submit(task, &self.name)))
                .map_err(to_py_err)?;
            if let Some(err) = dedup_to_py_err(&result, &self.name) {
                return Err(err);
            }
        }
        Ok(())
    }

    fn __repr__(&self) -> String {
        format!("Queue(name='{}')", self.name)
    }
}

/// An authenticated user.
#[pyclass(name = "User")]
#[derive(Clone)]
pub struct PyUser {
    claim: IdentityClaim,
}

#[pymethods]
impl PyUser {
    #[new]
    #[pyo3(signature = (email, user_id=None))]
    fn new(email: String, user_id: Option<String>) -> Self {
        let mut claim = IdentityClaim::new(email);
        claim.user_id = user_id;
        Self { claim }
    }

    fn email(&self) -> &str {
        &self.claim.email
    }

    fn user_id(&self) -> Option<&str> {
        self.claim.user_id.as_deref()
    }

    fn nickname(&self) -> &str {
        self.claim.nickname()
    }

    fn __str__(&self) -> &str {
        &self.claim.email
    }

    fn __repr__(&self) -> String {
        format!(
            "User(email={:?}, user_id={:?})",
            self.claim.email, self.claim.user_id
        )
    }

    fn __eq__(&self, other: &Self) -> bool {
        self.claim.email == other.claim.email && self.claim.user_id == other.claim.user_id
    }
}

fn identity_from(headers: HashMap<String, String>) -> PyResult<RequestIdentity> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| PyValueError::new_err(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|e| PyValueError::new_err(format!("invalid header value: {e}")))?;
        map.append(name, value);
    }
    RequestIdentity::from_headers(&CONTEXT.claims, &map)
        .map_err(|e| to_py_err(CompatError::from(e)))
}

/// Returns the signed-in user for a request's headers, or None.
#[pyfunction]
fn get_current_user(headers: HashMap<String, String>) -> PyResult<Option<PyUser>> {
    Ok(identity_from(headers)?
        .current_identity()
        .cloned()
        .map(|claim| PyUser { claim }))
}

/// Returns true if the request's user is an administrator.
#[pyfunction]
fn is_current_user_admin(headers: HashMap<String, String>) -> PyResult<bool> {
    Ok(identity_from(headers)?.is_admin())
}

#[pyfunction]
fn create_login_url(dest_url: &str) -> String {
    login_url(dest_url)
}

#[pyfunction]
fn create_logout_url(dest_url: &str) -> String {
    logout_url(dest_url)
}

/// Returns the default bucket name.
#[pyfunction]
fn default_bucket() -> PyResult<String> {
    CONTEXT
        .bucket
        .default_bucket()
        .map(ToString::to_string)
        .map_err(|e| to_py_err(e.into()))
}

/// Writes a JSON-encoded value and returns its blob name.
#[pyfunction]
#[pyo3(signature = (encoded_value, pipeline_id=None))]
fn write_json_gcs(py: Python<'_>, encoded_value: &str, pipeline_id: Option<&str>) -> PyResult<String> {
    let store = CONTEXT.blob_store()?;
    let rt = runtime()?;
    py.allow_threads(|| rt.block_on(store.write_json(encoded_value, pipeline_id)))
        .map_err(to_py_err)
}

/// Reads a blob's bytes.
#[pyfunction]
fn read_blob_gcs(py: Python<'_>, blob_name: &str) -> PyResult<Py<PyBytes>> {
    let store = CONTEXT.blob_store()?;
    let rt = runtime()?;
    let bytes = py
        .allow_threads(|| rt.block_on(store.read_blob(blob_name)))
        .map_err(to_py_err)?;
    Ok(PyBytes::new_bound(py, &bytes).unbind())
}

/// Switches between the in-memory backends and the live services.
#[pyfunction]
fn set_test_mode(enabled: bool) {
    CONTEXT.test_mode.store(enabled, Ordering::SeqCst);
    debug!(enabled, "Task queue test mode changed");
}

fn recorded_to_dict<'py>(py: Python<'py>, task: &RecordedTask) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new_bound(py);
    dict.set_item("name", &task.name)?;
    dict.set_item("url", &task.url)?;
    dict.set_item("method", task.method.as_str())?;

    let headers = PyList::empty_bound(py);
    for (k, v) in &task.headers {
        headers.append((k.to_ascii_lowercase(), v))?;
    }
    dict.set_item("headers", headers)?;
    dict.set_item(
        "body",
        PyBytes::new_bound(
            py,
            base64::engine::general_purpose::STANDARD
                .encode(&task.body)
                .as_bytes(),
        ),
    )?;
    dict.set_item("eta", task.eta)?;

    let params = PyDict::new_bound(py);
    for (key, value) in task.params() {
        match params.get_item(&key)? {
            Some(existing) => existing.downcast::<PyList>()?.append(value)?,
            None => params.set_item(key, PyList::new_bound(py, [value]))?,
        }
    }
    dict.set_item("params", params)?;
    Ok(dict)
}

/// Returns the tasks recorded in test mode for `queue_name`.
#[pyfunction]
#[pyo3(signature = (queue_name=DEFAULT_QUEUE))]
fn get_tasks(py: Python<'_>, queue_name: &str) -> PyResult<Py<PyList>> {
    let list = PyList::empty_bound(py);
    for task in CONTEXT.memory_tasks.tasks(queue_name) {
        list.append(recorded_to_dict(py, &task)?)?;
    }
    Ok(list.unbind())
}

/// Deletes recorded tasks, tombstoning their names.
#[pyfunction]
#[pyo3(signature = (task_list, queue_name=DEFAULT_QUEUE))]
fn delete_tasks(task_list: &Bound<'_, PyList>, queue_name: &str) -> PyResult<()> {
    for task in task_list.iter() {
        let name: String = task.get_item("name")?.extract()?;
        CONTEXT.memory_tasks.delete_task(queue_name, &name);
    }
    Ok(())
}

/// Forgets all recorded tasks, tombstones and blobs.
#[pyfunction]
fn reset_test_stub() {
    CONTEXT.memory_tasks.clear_all();
    CONTEXT.memory_blobs.clear();
}

/// The pipeline_compat_py Python module.
#[pymodule]
fn pipeline_compat_py(m: &Bound<'_, PyModule>) -> PyResult<()> {
    init_logging(&CONTEXT.config.logging);

    let py = m.py();
    m.add("Error", py.get_type_bound::<Error>())?;
    m.add("TaskAlreadyExistsError", py.get_type_bound::<TaskAlreadyExistsError>())?;
    m.add("TombstonedTaskError", py.get_type_bound::<TombstonedTaskError>())?;

    m.add_class::<PyTask>()?;
    m.add_class::<PyQueue>()?;
    m.add_class::<PyUser>()?;

    m.add_function(wrap_pyfunction!(get_current_user, m)?)?;
    m.add_function(wrap_pyfunction!(is_current_user_admin, m)?)?;
    m.add_function(wrap_pyfunction!(create_login_url, m)?)?;
    m.add_function(wrap_pyfunction!(create_logout_url, m)?)?;
    m.add_function(wrap_pyfunction!(default_bucket, m)?)?;
    m.add_function(wrap_pyfunction!(write_json_gcs, m)?)?;
    m.add_function(wrap_pyfunction!(read_blob_gcs, m)?)?;
    m.add_function(wrap_pyfunction!(set_test_mode, m)?)?;
    m.add_function(wrap_pyfunction!(get_tasks, m)?)?;
    m.add_function(wrap_pyfunction!(delete_tasks, m)?)?;
    m.add_function(wrap_pyfunction!(reset_test_stub, m)?)?;

    m.add("__version__", env!("CARGO_PKG_VERSION"))?;

    Ok(())
}
