//! Route tree and request dispatch.
//!
//! A [`Router`] is an arena of nodes. Node 0 is the root; nested routers are
//! further nodes holding the index of their parent, so the tree has no
//! back-pointers. Each node owns, in registration order:
//!
//! - entries: leaf handlers and mounted sub-routers
//! - middleware wrapping everything below the node
//! - exception handlers for errors raised below the node
//!
//! Registration rejects any route that is already reachable from the node,
//! from one of its ancestors, or through an already mounted sub-router.
//!
//! # Dispatch
//!
//! Entries are scanned in order. A leaf matches on path equality. A
//! sub-router matches when its mount path is a prefix of the request path
//! and the rest of the path is handled somewhere inside it, so a partial
//! prefix match falls through to later siblings.
//!
//! Errors raised below a node go to its exception handlers, then to the
//! parent's middleware and handlers. An error nothing handles becomes an
//! `InternalServerError` response carrying the error type and message.
//!
//! # Example
//!
//! ```
//! use peerwire::router::{handler, Request, Response, RoutePath, Router};
//!
//! let mut users = Router::new();
//! users.route("/list", |_: &Request| Ok(Response::ok())).unwrap();
//!
//! let mut root = Router::new();
//! root.mount("/users", users).unwrap();
//! root.route("/ping", handler::body(|_: Option<()>| Ok("pong"))).unwrap();
//!
//! assert_eq!(root.handled_routes(), vec!["/users/list", "/ping"]);
//! assert!(root.route("/users/list", |_: &Request| Ok(Response::ok())).is_err());
//! assert!(root
//!     .resolve_execution(&RoutePath::parse("/nope"), &Default::default())
//!     .is_none());
//! ```

mod error;
mod exception;
pub mod handler;
mod middleware;
mod path;
mod request;
mod response;

pub use error::{HandlerError, Panicked};
pub use exception::{catch, catch_all, ExceptionHandler};
pub use handler::RouteHandler;
pub use middleware::{from_fn, Middleware, Next};
pub use path::RoutePath;
pub use request::Request;
pub use response::{Headers, Reply, Response, Status};

use std::error::Error as StdError;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::{PeerwireError, Result};
use crate::scheduler::Execution;

/// Identifies a router node inside a [`Router`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouterId(usize);

impl RouterId {
    /// The root node.
    pub const ROOT: RouterId = RouterId(0);
}

enum Entry {
    Leaf {
        path: RoutePath,
        handler: RouteHandler,
        execution: Option<Execution>,
    },
    Router {
        path: RoutePath,
        node: usize,
    },
}

struct Node {
    parent: Option<usize>,
    mount: RoutePath,
    entries: Vec<Entry>,
    middleware: Vec<Middleware>,
    exception_handlers: Vec<ExceptionHandler>,
    execution: Option<Execution>,
}

impl Node {
    fn new(parent: Option<usize>, mount: RoutePath) -> Self {
        Self {
            parent,
            mount,
            entries: Vec::new(),
            middleware: Vec::new(),
            exception_handlers: Vec::new(),
            execution: None,
        }
    }
}

/// Route tree.
///
/// The tree is built before the transport starts and is read-only once it
/// is handed over.
pub struct Router {
    nodes: Vec<Node>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(None, RoutePath::root())],
        }
    }

    /// Registration scope for the node `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this router.
    pub fn at(&mut self, id: RouterId) -> RouterScope<'_> {
        assert!(id.0 < self.nodes.len(), "router id {:?} out of range", id);
        RouterScope {
            router: self,
            node: id.0,
        }
    }

    /// Register a leaf handler on the root.
    pub fn route<H>(&mut self, path: &str, handler: H) -> Result<&mut Self>
    where
        H: Fn(&Request) -> std::result::Result<Response, HandlerError> + Send + Sync + 'static,
    {
        self.add_route(0, path, Arc::new(handler), None)?;
        Ok(self)
    }

    /// Register a leaf handler on the root with its own execution option.
    pub fn route_with<H>(&mut self, path: &str, execution: Execution, handler: H) -> Result<&mut Self>
    where
        H: Fn(&Request) -> std::result::Result<Response, HandlerError> + Send + Sync + 'static,
    {
        self.add_route(0, path, Arc::new(handler), Some(execution))?;
        Ok(self)
    }

    /// Create an empty sub-router at `path` under the root.
    pub fn nest(&mut self, path: &str) -> Result<RouterId> {
        self.add_router(0, path, Router::new())
    }

    /// Move `router` into this tree at `path` under the root.
    pub fn mount(&mut self, path: &str, router: Router) -> Result<RouterId> {
        self.add_router(0, path, router)
    }

    pub fn middleware<F>(&mut self, middleware: F) -> &mut Self
    where
        F: Fn(&mut Request, Next<'_>) -> std::result::Result<Response, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.nodes[0].middleware.push(Arc::new(middleware));
        self
    }

    pub fn catch<E, F>(&mut self, handler: F) -> &mut Self
    where
        E: StdError + 'static,
        F: Fn(&Request, &E) -> std::result::Result<Response, HandlerError> + Send + Sync + 'static,
    {
        self.nodes[0].exception_handlers.push(catch::<E, F>(handler));
        self
    }

    pub fn catch_all<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&Request, &HandlerError) -> std::result::Result<Response, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.nodes[0].exception_handlers.push(catch_all(handler));
        self
    }

    /// Default execution option for routes on the root.
    ///
    /// # Errors
    ///
    /// Fails once the root has entries.
    pub fn set_execution(&mut self, execution: Execution) -> Result<&mut Self> {
        self.set_node_execution(0, execution)?;
        Ok(self)
    }

    /// Full paths of every leaf, in registration order.
    pub fn handled_routes(&self) -> Vec<String> {
        let mut routes = Vec::new();
        self.collect_routes(0, &RoutePath::root(), &mut routes);
        routes.iter().map(ToString::to_string).collect()
    }

    /// Check if a request for `path` would reach a handler.
    pub fn is_route_handled(&self, path: &str) -> bool {
        self.node_handles(0, &RoutePath::parse(path))
    }

    /// Execution option of the leaf handling `path`.
    ///
    /// Leaves without their own option inherit from the nearest router that
    /// has one, and from `fallback` otherwise. `None` means no route handles
    /// `path`.
    pub fn resolve_execution(&self, path: &RoutePath, fallback: &Execution) -> Option<Execution> {
        let (node, entry) = self.find_leaf(0, path)?;
        if let Entry::Leaf {
            execution: Some(execution),
            ..
        } = entry
        {
            return Some(execution.clone());
        }
        let mut current = Some(node);
        while let Some(index) = current {
            if let Some(execution) = &self.nodes[index].execution {
                return Some(execution.clone());
            }
            current = self.nodes[index].parent;
        }
        Some(fallback.clone())
    }

    /// Run `request` through the tree.
    ///
    /// Never fails: unmatched paths give `NotFound` and unhandled errors give
    /// `InternalServerError`, with a backtrace header when
    /// `include_stack_trace` is set.
    pub fn dispatch(&self, request: &mut Request, include_stack_trace: bool) -> Response {
        let path = request.path().clone();
        match self.handle_node(0, request, &path) {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(
                    "Unhandled {} on {}: {}",
                    error.type_name(),
                    path,
                    error.message()
                );
                internal_error(&error, include_stack_trace)
            }
        }
    }

    fn add_route(
        &mut self,
        node: usize,
        path: &str,
        handler: RouteHandler,
        execution: Option<Execution>,
    ) -> Result<()> {
        let path = RoutePath::parse(path);
        if self.node_handles(node, &path) || self.parent_handles(node, &path) {
            return Err(PeerwireError::Route(format!(
                "Cannot add route {} because that route is already handled by another handler",
                path
            )));
        }
        self.nodes[node].entries.push(Entry::Leaf {
            path,
            handler,
            execution,
        });
        Ok(())
    }

    fn add_router(&mut self, node: usize, path: &str, router: Router) -> Result<RouterId> {
        let path = RoutePath::parse(path);
        if path.is_root() {
            return Err(PeerwireError::Route(
                "Cannot add router to empty route /".to_string(),
            ));
        }
        if self.node_handles(node, &path) || self.parent_handles(node, &path) {
            return Err(PeerwireError::Route(format!(
                "Cannot add router at {} because route {} is already handled",
                path, path
            )));
        }
        for route in router.leaf_paths() {
            let full = path.concat(&route);
            if self.node_handles(node, &full) || self.parent_handles(node, &full) {
                return Err(PeerwireError::Route(format!(
                    "Cannot add router at {} because route {} is already handled",
                    path, route
                )));
            }
        }

        let offset = self.nodes.len();
        for (index, mut child) in router.nodes.into_iter().enumerate() {
            if index == 0 {
                child.parent = Some(node);
                child.mount = path.clone();
            } else {
                child.parent = child.parent.map(|p| p + offset);
            }
            for entry in &mut child.entries {
                if let Entry::Router { node: n, .. } = entry {
                    *n += offset;
                }
            }
            self.nodes.push(child);
        }
        self.nodes[node].entries.push(Entry::Router { path, node: offset });
        Ok(RouterId(offset))
    }

    fn set_node_execution(&mut self, node: usize, execution: Execution) -> Result<()> {
        if !self.nodes[node].entries.is_empty() {
            return Err(PeerwireError::Route(format!(
                "Cannot change execution of router at {} after routes were added",
                self.nodes[node].mount
            )));
        }
        self.nodes[node].execution = Some(execution);
        Ok(())
    }

    /// Check if `route`, relative to `node`, reaches a leaf under `node`.
    fn node_handles(&self, node: usize, route: &RoutePath) -> bool {
        self.nodes[node].entries.iter().any(|entry| match entry {
            Entry::Router { path, node: child } => {
                path.matches_prefix(route) && self.node_handles(*child, &route.pop(path))
            }
            Entry::Leaf { path, .. } => path.matches_exactly(route),
        })
    }

    /// Check if `route`, relative to `node`, is handled by any ancestor.
    fn parent_handles(&self, node: usize, route: &RoutePath) -> bool {
        let current = &self.nodes[node];
        match current.parent {
            None => false,
            Some(parent) => {
                let full = current.mount.concat(route);
                self.node_handles(parent, &full) || self.parent_handles(parent, &full)
            }
        }
    }

    fn find_leaf(&self, node: usize, route: &RoutePath) -> Option<(usize, &Entry)> {
        for entry in &self.nodes[node].entries {
            match entry {
                Entry::Router { path, node: child } if path.matches_prefix(route) => {
                    if let Some(found) = self.find_leaf(*child, &route.pop(path)) {
                        return Some(found);
                    }
                }
                Entry::Leaf { path, .. } if path.matches_exactly(route) => {
                    return Some((node, entry));
                }
                _ => {}
            }
        }
        None
    }

    fn leaf_paths(&self) -> Vec<RoutePath> {
        let mut routes = Vec::new();
        self.collect_routes(0, &RoutePath::root(), &mut routes);
        routes
    }

    fn collect_routes(&self, node: usize, prefix: &RoutePath, out: &mut Vec<RoutePath>) {
        for entry in &self.nodes[node].entries {
            match entry {
                Entry::Leaf { path, .. } => out.push(prefix.concat(path)),
                Entry::Router { path, node: child } => {
                    self.collect_routes(*child, &prefix.concat(path), out)
                }
            }
        }
    }

    fn handle_node(
        &self,
        node: usize,
        request: &mut Request,
        route: &RoutePath,
    ) -> std::result::Result<Response, HandlerError> {
        request.set_remaining(route.clone());
        let current = &self.nodes[node];
        let endpoint = |req: &mut Request| self.route_node(node, req, route);

        let result = catch_unwind(AssertUnwindSafe(|| {
            Next::new(&current.middleware, &endpoint).run(request)
        }))
        .unwrap_or_else(|payload| Err(HandlerError::from_panic(payload)));

        match result {
            Ok(response) => Ok(response),
            Err(error) => {
                request.set_remaining(route.clone());
                exception::resolve(&current.exception_handlers, request, error)
            }
        }
    }

    fn route_node(
        &self,
        node: usize,
        request: &mut Request,
        route: &RoutePath,
    ) -> std::result::Result<Response, HandlerError> {
        for entry in &self.nodes[node].entries {
            match entry {
                Entry::Router { path, node: child } if path.matches_prefix(route) => {
                    let rest = route.pop(path);
                    if self.node_handles(*child, &rest) {
                        return self.handle_node(*child, request, &rest);
                    }
                }
                Entry::Leaf { path, handler, .. } if path.matches_exactly(route) => {
                    return handler(&*request);
                }
                _ => {}
            }
        }
        Ok(Response::new(Status::NotFound))
    }
}

fn internal_error(error: &HandlerError, include_stack_trace: bool) -> Response {
    let mut response = Response::new(Status::InternalServerError)
        .with_header("exception-type", error.type_name())
        .with_header("exception-message", error.message());
    if include_stack_trace {
        response = response.with_header("exception-stacktrace", error.backtrace().to_string());
    }
    response
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("nodes", &self.nodes.len())
            .field("routes", &self.handled_routes())
            .finish()
    }
}

/// Registration handle for one node of a [`Router`].
pub struct RouterScope<'a> {
    router: &'a mut Router,
    node: usize,
}

impl<'a> RouterScope<'a> {
    pub fn id(&self) -> RouterId {
        RouterId(self.node)
    }

    pub fn route<H>(&mut self, path: &str, handler: H) -> Result<&mut Self>
    where
        H: Fn(&Request) -> std::result::Result<Response, HandlerError> + Send + Sync + 'static,
    {
        self.router.add_route(self.node, path, Arc::new(handler), None)?;
        Ok(self)
    }

    pub fn route_with<H>(&mut self, path: &str, execution: Execution, handler: H) -> Result<&mut Self>
    where
        H: Fn(&Request) -> std::result::Result<Response, HandlerError> + Send + Sync + 'static,
    {
        self.router
            .add_route(self.node, path, Arc::new(handler), Some(execution))?;
        Ok(self)
    }

    pub fn nest(&mut self, path: &str) -> Result<RouterId> {
        self.router.add_router(self.node, path, Router::new())
    }

    pub fn mount(&mut self, path: &str, router: Router) -> Result<RouterId> {
        self.router.add_router(self.node, path, router)
    }

    pub fn middleware<F>(&mut self, middleware: F) -> &mut Self
    where
        F: Fn(&mut Request, Next<'_>) -> std::result::Result<Response, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.router.nodes[self.node]
            .middleware
            .push(Arc::new(middleware));
        self
    }

    pub fn catch<E, F>(&mut self, handler: F) -> &mut Self
    where
        E: StdError + 'static,
        F: Fn(&Request, &E) -> std::result::Result<Response, HandlerError> + Send + Sync + 'static,
    {
        self.router.nodes[self.node]
            .exception_handlers
            .push(catch::<E, F>(handler));
        self
    }

    pub fn catch_all<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&Request, &HandlerError) -> std::result::Result<Response, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.router.nodes[self.node]
            .exception_handlers
            .push(catch_all(handler));
        self
    }

    pub fn set_execution(&mut self, execution: Execution) -> Result<&mut Self> {
        self.router.set_node_execution(self.node, execution)?;
        Ok(self)
    }

    /// Check if `path`, relative to this node, is already handled anywhere
    /// in the tree.
    pub fn is_route_handled(&self, path: &str) -> bool {
        let path = RoutePath::parse(path);
        self.router.node_handles(self.node, &path) || self.router.parent_handles(self.node, &path)
    }
}
