//! Semantic browser-interaction layer on top of the bounded poll primitive.
//!
//! Every operation locates its target through [`Scraper::find`], which retries
//! until the element appears or the timeout elapses, then acts on the remote
//! element handle. Interactive calls are followed by a randomized think-time
//! pause; they perturb real page state and must not be retried blindly.

use std::sync::Arc;
use std::time::Duration;

use headless_chrome::{Browser, Element, Tab};
use rand::Rng;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::parse_browser_socket;
use crate::poll::{self, DEFAULT_TIMEOUT};
use crate::utils::error::{AppError, Result};
use crate::utils::net;

/// Selector strategies understood by [`Scraper::find`].
#[derive(Debug, Clone, Copy)]
pub enum By<'a> {
    Id(&'a str),
    ClassName(&'a str),
    Css(&'a str),
    Tag(&'a str),
    Text(&'a str),
    XPath(&'a str),
}

impl By<'_> {
    fn describe(&self) -> String {
        match self {
            By::Id(value) => format!("ID '{value}'"),
            By::ClassName(value) => format!("CSS class '{value}'"),
            By::Css(value) => format!("CSS selector '{value}'"),
            By::Tag(value) => format!("tag <{value}>"),
            By::Text(value) => format!("text '{value}'"),
            By::XPath(value) => format!("XPath '{value}'"),
        }
    }
}

/// Element states [`Scraper::check`] can evaluate without mutating the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Is {
    Clickable,
    Displayed,
    Disabled,
    Readonly,
    Selected,
}

/// Form-control kinds discovered at runtime for special-attribute fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormControlKind {
    Selection,
    Checkbox,
    Text,
}

// see https://api.jquery.com/category/selectors/
const METACHARS: &str = "!\"#$%&'()*+,./:;<=>?@[\\]^`{|}~";

/// Escapes selector metacharacters in a raw id or class name.
pub fn escape_metachars(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if METACHARS.contains(ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Bounds of the randomized pause applied after interactive calls.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            min_ms: 1_000,
            max_ms: 2_500,
        }
    }
}

impl Pacing {
    fn sample(&self) -> Duration {
        if self.max_ms <= self.min_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(rand::thread_rng().gen_range(self.min_ms..self.max_ms))
    }
}

/// Attaches to an already-running browser over its DevTools debugging socket.
/// Fails fast when the port is not accepting connections.
pub async fn connect_browser(browser_socket: &str) -> Result<Browser> {
    let (host, port) = parse_browser_socket(browser_socket)?;
    if !net::is_port_open(&host, port) {
        return Err(AppError::Browser(format!(
            "browser remote debugging port is not open on socket {browser_socket}"
        )));
    }

    let version: Value = reqwest::get(format!("http://{host}:{port}/json/version"))
        .await?
        .json()
        .await?;
    let ws_url = version
        .get("webSocketDebuggerUrl")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            AppError::Browser(format!(
                "no webSocketDebuggerUrl reported by the debugging endpoint at {browser_socket}"
            ))
        })?;

    Browser::connect(ws_url.to_string()).map_err(AppError::from)
}

pub struct Scraper {
    tab: Arc<Tab>,
    pacing: Pacing,
}

impl Scraper {
    pub fn new(tab: Arc<Tab>) -> Self {
        Self {
            tab,
            pacing: Pacing::default(),
        }
    }

    pub fn with_pacing(tab: Arc<Tab>, pacing: Pacing) -> Self {
        Self { tab, pacing }
    }

    pub fn url(&self) -> String {
        self.tab.get_url()
    }

    pub async fn goto(&self, url: &str) -> Result<()> {
        debug!("navigating to {url}");
        self.tab.navigate_to(url)?;
        self.tab.wait_until_navigated()?;
        Ok(())
    }

    /// Locates one element, polling until it appears or `DEFAULT_TIMEOUT` elapses.
    pub async fn find(&self, by: By<'_>) -> Result<Element<'_>> {
        self.find_with_timeout(by, DEFAULT_TIMEOUT).await
    }

    pub async fn find_with_timeout(&self, by: By<'_>, timeout: Duration) -> Result<Element<'_>> {
        self.find_scoped(by, None, timeout).await
    }

    /// Like [`Scraper::find`] but optionally scoped to a parent element's
    /// subtree. Structural selector kinds (text, XPath) cannot be scoped.
    pub async fn find_scoped(
        &self,
        by: By<'_>,
        parent: Option<&Element<'_>>,
        timeout: Duration,
    ) -> Result<Element<'_>> {
        let message = format!(
            "No HTML element found using {} within {timeout:?}",
            by.describe()
        );
        match by {
            By::Id(id) => {
                let selector = format!("#{}", escape_metachars(id));
                self.poll_css(&selector, parent, timeout, &message).await
            }
            By::ClassName(class) => {
                let selector = format!(".{}", escape_metachars(class));
                self.poll_css(&selector, parent, timeout, &message).await
            }
            By::Css(selector) | By::Tag(selector) => {
                self.poll_css(selector, parent, timeout, &message).await
            }
            By::Text(text) => {
                reject_parent(&by, parent)?;
                let xpath = format!("//*[contains(normalize-space(.), '{text}')]");
                self.poll_xpath(&xpath, timeout, &message).await
            }
            By::XPath(xpath) => {
                reject_parent(&by, parent)?;
                self.poll_xpath(xpath, timeout, &message).await
            }
        }
    }

    /// Locates all matches, polling until at least one appears.
    pub async fn find_all(&self, by: By<'_>, timeout: Duration) -> Result<Vec<Element<'_>>> {
        let message = format!(
            "No HTML elements found using {} within {timeout:?}",
            by.describe()
        );
        match by {
            By::Id(id) => {
                let selector = format!("#{}", escape_metachars(id));
                self.poll_css_all(&selector, timeout, &message).await
            }
            By::ClassName(class) => {
                let selector = format!(".{}", escape_metachars(class));
                self.poll_css_all(&selector, timeout, &message).await
            }
            By::Css(selector) | By::Tag(selector) => {
                self.poll_css_all(selector, timeout, &message).await
            }
            By::Text(text) => {
                let xpath = format!("//*[contains(normalize-space(.), '{text}')]");
                self.poll_xpath_all(&xpath, timeout, &message).await
            }
            By::XPath(xpath) => self.poll_xpath_all(xpath, timeout, &message).await,
        }
    }

    async fn poll_css(
        &self,
        selector: &str,
        parent: Option<&Element<'_>>,
        timeout: Duration,
        message: &str,
    ) -> Result<Element<'_>> {
        match parent {
            Some(scope) => {
                let node_id = scope.node_id;
                poll::poll(
                    || {
                        Ok(retry_find(
                            self.tab.run_query_selector_on_node(node_id, selector),
                            selector,
                        ))
                    },
                    timeout,
                    message,
                )
                .await
            }
            None => {
                poll::poll(
                    || Ok(retry_find(self.tab.find_element(selector), selector)),
                    timeout,
                    message,
                )
                .await
            }
        }
    }

    async fn poll_css_all(
        &self,
        selector: &str,
        timeout: Duration,
        message: &str,
    ) -> Result<Vec<Element<'_>>> {
        poll::poll(
            || {
                Ok(retry_find(self.tab.find_elements(selector), selector)
                    .filter(|found| !found.is_empty()))
            },
            timeout,
            message,
        )
        .await
    }

    async fn poll_xpath(
        &self,
        xpath: &str,
        timeout: Duration,
        message: &str,
    ) -> Result<Element<'_>> {
        poll::poll(
            || Ok(retry_find(self.tab.find_element_by_xpath(xpath), xpath)),
            timeout,
            message,
        )
        .await
    }

    async fn poll_xpath_all(
        &self,
        xpath: &str,
        timeout: Duration,
        message: &str,
    ) -> Result<Vec<Element<'_>>> {
        poll::poll(
            || {
                Ok(retry_find(self.tab.find_elements_by_xpath(xpath), xpath)
                    .filter(|found| !found.is_empty()))
            },
            timeout,
            message,
        )
        .await
    }

    /// Locates an element, clicks it and applies the pacing pause.
    pub async fn click(&self, by: By<'_>) -> Result<Element<'_>> {
        self.click_with_timeout(by, DEFAULT_TIMEOUT).await
    }

    pub async fn click_with_timeout(&self, by: By<'_>, timeout: Duration) -> Result<Element<'_>> {
        let elem = self.find_with_timeout(by, timeout).await?;
        elem.click()?;
        self.pause().await;
        Ok(elem)
    }

    /// Locates an input field, clears it, types `text` and pauses.
    pub async fn input(&self, by: By<'_>, text: &str) -> Result<Element<'_>> {
        let field = self.find(by).await?;
        self.fill(&field, text)?;
        self.pause().await;
        Ok(field)
    }

    /// Clears an already-located field and types into it.
    pub fn fill(&self, field: &Element<'_>, text: &str) -> Result<()> {
        field.call_js_fn("function () { this.value = ''; }", vec![], false)?;
        field.type_into(text)?;
        Ok(())
    }

    /// Selects an `<option>` of a `<select>` control by value. Waits until the
    /// control is clickable, then scans its options; a missing option fails
    /// with an option-not-found error after the attempt.
    pub async fn select(&self, by: By<'_>, value: &str) -> Result<Element<'_>> {
        let elem = self.find(by).await?;
        let clickable_message = format!(
            "No clickable HTML element found using {}",
            by.describe()
        );
        poll::poll(
            || Ok(self.state(&elem, Is::Clickable)?.then_some(())),
            DEFAULT_TIMEOUT,
            &clickable_message,
        )
        .await?;
        self.select_value(&elem, value, &by.describe())?;
        self.pause().await;
        Ok(elem)
    }

    /// Option selection on an already-located `<select>` element.
    pub fn select_value(&self, elem: &Element<'_>, value: &str, described: &str) -> Result<()> {
        let found = elem.call_js_fn(JS_SELECT_OPTION, vec![json!(value)], false)?;
        if found.value.as_ref().and_then(Value::as_bool).unwrap_or(false) {
            Ok(())
        } else {
            Err(AppError::OptionNotFound {
                selector: described.to_string(),
                value: value.to_string(),
            })
        }
    }

    /// Evaluates a non-mutating state predicate against an element.
    pub async fn check(&self, by: By<'_>, state: Is) -> Result<bool> {
        self.check_with_timeout(by, state, DEFAULT_TIMEOUT).await
    }

    pub async fn check_with_timeout(
        &self,
        by: By<'_>,
        state: Is,
        timeout: Duration,
    ) -> Result<bool> {
        let elem = self.find_with_timeout(by, timeout).await?;
        self.state(&elem, state)
    }

    pub fn state(&self, elem: &Element<'_>, state: Is) -> Result<bool> {
        match state {
            Is::Disabled => self.js_bool(elem, "function () { return this.hasAttribute('disabled'); }"),
            Is::Readonly => self.js_bool(elem, "function () { return this.hasAttribute('readonly'); }"),
            Is::Displayed => self.js_bool(elem, JS_IS_DISPLAYED),
            Is::Selected => self.js_bool(elem, JS_IS_SELECTED),
            Is::Clickable => {
                Ok(!self.state(elem, Is::Disabled)? || self.state(elem, Is::Displayed)?)
            }
        }
    }

    /// Visible text of an element.
    pub async fn text(&self, by: By<'_>) -> Result<String> {
        self.text_with_timeout(by, DEFAULT_TIMEOUT).await
    }

    pub async fn text_with_timeout(&self, by: By<'_>, timeout: Duration) -> Result<String> {
        let elem = self.find_with_timeout(by, timeout).await?;
        elem.get_inner_text().map_err(AppError::from)
    }

    /// Runs a script in the page context and returns its value.
    pub async fn execute(&self, script: &str) -> Result<Value> {
        let result = self.tab.evaluate(script, true)?;
        Ok(result.value.unwrap_or(Value::Null))
    }

    /// Issues a same-origin request from within the page context, carrying the
    /// page's session, and parses the JSON body.
    pub async fn fetch_json(
        &self,
        url: &str,
        method: &str,
        valid_status_codes: &[u16],
    ) -> Result<Value> {
        let script = format!(
            r#"
            fetch("{url}", {{
                method: "{method}",
                redirect: "follow"
            }})
            .then(response => response.json().then(data => {{ return {{ statusCode: response.status, data }}; }}))
            "#
        );
        let response = self.execute(&script).await?;
        let status = response
            .get("statusCode")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u16;
        if !valid_status_codes.contains(&status) {
            return Err(AppError::Browser(format!(
                "invalid response status {status} received for HTTP {method} to {url}"
            )));
        }
        Ok(response.get("data").cloned().unwrap_or(Value::Null))
    }

    /// Exposes the bounded poll primitive for workflow-level conditions.
    pub async fn wait_for<F>(&self, condition: F, timeout: Duration, message: &str) -> Result<()>
    where
        F: FnMut() -> bool,
    {
        poll::wait_until(condition, timeout, message).await
    }

    /// Randomized think-time pause applied after interactive calls.
    pub async fn pause(&self) {
        let duration = self.pacing.sample();
        debug!("pausing for {} ms", duration.as_millis());
        tokio::time::sleep(duration).await;
    }

    /// Smoothly scrolls the page down so the operator can see the full form.
    pub async fn scroll_page_down(&self) -> Result<()> {
        let bottom = self
            .execute("document.body.scrollHeight")
            .await?
            .as_i64()
            .unwrap_or(0);
        let mut current = 0i64;
        while current < bottom {
            current += 10;
            self.tab.evaluate(&format!("window.scrollTo(0, {current})"), false)?;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        Ok(())
    }

    /// Discovers what kind of form control an element is, so the caller can
    /// dispatch on a closed set instead of probing ad hoc.
    pub fn inspect_control(&self, elem: &Element<'_>) -> Result<FormControlKind> {
        let described = elem.call_js_fn(JS_DESCRIBE_CONTROL, vec![], false)?;
        match described.value.as_ref().and_then(Value::as_str) {
            Some("selection") => Ok(FormControlKind::Selection),
            Some("checkbox") => Ok(FormControlKind::Checkbox),
            _ => Ok(FormControlKind::Text),
        }
    }

    /// Whether the visible account-identity region names `username`.
    pub async fn logged_in_as(&self, username: &str) -> Result<bool> {
        let needle = username.to_lowercase();
        match self.text(By::ClassName("mr-medium")).await {
            Ok(info) => Ok(info.to_lowercase().contains(&needle)),
            Err(err) if err.is_timeout() => match self.text(By::Id("user-email")).await {
                Ok(info) => Ok(info.to_lowercase().contains(&needle)),
                Err(err) if err.is_timeout() => Ok(false),
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    pub async fn ensure_logged_in(&self, username: &str) -> Result<()> {
        if self.logged_in_as(username).await? {
            Ok(())
        } else {
            Err(AppError::LoginRequired {
                username: username.to_string(),
            })
        }
    }

    fn js_bool(&self, elem: &Element<'_>, function: &str) -> Result<bool> {
        let result = elem.call_js_fn(function, vec![], false)?;
        Ok(result.value.as_ref().and_then(Value::as_bool).unwrap_or(false))
    }
}

/// An absent element is "not there yet", not a failure, but the protocol
/// error is still worth a trace when a lookup keeps failing.
fn retry_find<T>(found: anyhow::Result<T>, selector: &str) -> Option<T> {
    match found {
        Ok(value) => Some(value),
        Err(err) => {
            debug!("retrying lookup of '{selector}': {err:#}");
            None
        }
    }
}

fn reject_parent(by: &By<'_>, parent: Option<&Element<'_>>) -> Result<()> {
    if parent.is_some() {
        return Err(AppError::Validation(format!(
            "scoping to a parent element is not supported with {}",
            by.describe()
        )));
    }
    Ok(())
}

const JS_IS_DISPLAYED: &str = r#"
function () {
    const style = window.getComputedStyle(this);
    return style.display !== 'none'
        && style.visibility !== 'hidden'
        && style.opacity !== '0'
        && this.offsetWidth > 0
        && this.offsetHeight > 0;
}"#;

const JS_IS_SELECTED: &str = r#"
function () {
    if (this.tagName.toLowerCase() === 'input'
        && (this.type === 'checkbox' || this.type === 'radio')) {
        return this.checked;
    }
    return false;
}"#;

const JS_SELECT_OPTION: &str = r#"
function (value) {
    for (let i = 0; i < this.options.length; i++) {
        if (this.options[i].value == value) {
            this.selectedIndex = i;
            this.dispatchEvent(new Event('change', { bubbles: true }));
            return true;
        }
    }
    return false;
}"#;

const JS_DESCRIBE_CONTROL: &str = r#"
function () {
    const tag = this.tagName.toLowerCase();
    if (tag === 'select') { return 'selection'; }
    if (tag === 'input' && (this.type === 'checkbox' || this.type === 'radio')) { return 'checkbox'; }
    return 'text';
}"#;
