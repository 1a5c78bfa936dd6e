//! Browser instance pool.
//!
//! Owns a bounded set of headless Chromium instances keyed by instance id.
//! When a create would exceed capacity the least-recently-active instance is
//! closed first; the select-and-remove step runs under the pool write lock so
//! concurrent mutation cannot pick the same victim twice. Creates themselves
//! are serialised by an admission lock so the capacity check and the insert
//! are atomic with respect to each other.

use std::{collections::HashMap, sync::Arc, time::Instant};

use {
    chromiumoxide::{
        Browser, BrowserConfig as CdpBrowserConfig, Page,
        cdp::browser_protocol::{
            emulation::SetDeviceMetricsOverrideParams,
            input::{
                DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
                DispatchMouseEventType, MouseButton as CdpMouseButton,
            },
            page::CaptureScreenshotFormat,
        },
        page::ScreenshotParams,
    },
    futures::StreamExt,
    rand::Rng,
    serde::Deserialize,
    tokio::sync::{Mutex, RwLock},
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    index::PoolIndex,
    types::{
        self, BrowserAction, ImageFormat, LaunchConfig, MouseButton, SnapshotOptions, Viewport,
        normalize_url, parse_key_chord,
    },
};

/// One pooled instance: a dedicated browser process and its single page.
struct PooledInstance {
    browser: Browser,
    page: Page,
    viewport: Viewport,
    current_url: String,
    /// Last pointer position, used when mouseDown/mouseUp omit coordinates.
    pointer: (f64, f64),
}

struct PoolInner {
    instances: HashMap<String, Arc<Mutex<PooledInstance>>>,
    index: PoolIndex,
}

/// Bounded pool of browser instances.
pub struct BrowserPool {
    config: LaunchConfig,
    inner: RwLock<PoolInner>,
    /// Serialises create so capacity check, eviction, and insert are atomic
    /// with respect to concurrent creates.
    admission: Mutex<()>,
}

impl BrowserPool {
    pub fn new(config: LaunchConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(PoolInner {
                instances: HashMap::new(),
                index: PoolIndex::new(),
            }),
            admission: Mutex::new(()),
        }
    }

    /// Launch a new instance at `url`, evicting the LRU instance first when
    /// the pool is at capacity. Returns the new instance id.
    pub async fn create(&self, url: &str, width: u32, height: u32) -> Result<String> {
        let _admission = self.admission.lock().await;

        loop {
            let victim = {
                let mut inner = self.inner.write().await;
                if inner.index.len() < self.config.max_browsers {
                    break;
                }
                let Some(victim) = inner.index.victim() else {
                    return Err(Error::Capacity);
                };
                inner.index.remove(&victim);
                inner.instances.remove(&victim).map(|inst| (victim, inst))
            };
            if let Some((victim_id, instance)) = victim {
                info!(browser_id = %victim_id, "evicting least-recently-active instance");
                close_instance(&victim_id, instance).await;
            }
        }

        let id = generate_instance_id();
        let normalized = normalize_url(url);
        types::validate_url(&normalized).map_err(Error::NavigationFailed)?;
        let instance = self.launch(&normalized, width, height).await?;

        {
            let mut inner = self.inner.write().await;
            inner
                .instances
                .insert(id.clone(), Arc::new(Mutex::new(instance)));
            inner.index.insert(id.clone(), Instant::now());
        }

        info!(browser_id = %id, url = %normalized, width, height, "launched browser instance");
        Ok(id)
    }

    /// Close an instance. Idempotent; returns whether it existed.
    pub async fn close(&self, id: &str) -> bool {
        let instance = {
            let mut inner = self.inner.write().await;
            inner.index.remove(id);
            inner.instances.remove(id)
        };
        match instance {
            Some(instance) => {
                close_instance(id, instance).await;
                info!(browser_id = %id, "closed browser instance");
                true
            },
            None => false,
        }
    }

    /// Rasterise the instance's viewport.
    pub async fn snapshot(&self, id: &str, opts: SnapshotOptions) -> Result<Vec<u8>> {
        let instance = self.checkout(id).await?;
        let page = instance.lock().await.page.clone();

        let mut params = ScreenshotParams::builder()
            .format(match opts.format {
                ImageFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
                ImageFormat::Png => CaptureScreenshotFormat::Png,
            })
            .full_page(opts.full_page);
        if opts.format == ImageFormat::Jpeg {
            params = params.quality(i64::from(opts.quality.clamp(1, 100)));
        }

        page.screenshot(params.build())
            .await
            .map_err(|e| Error::ScreenshotFailed(e.to_string()))
    }

    /// Navigate the instance. The input gets `https://` prepended when it
    /// lacks a scheme. Resolves on navigation commit, not full load, so
    /// latency stays bounded.
    pub async fn navigate(&self, id: &str, url: &str) -> Result<String> {
        let instance = self.checkout(id).await?;
        let normalized = normalize_url(url);
        types::validate_url(&normalized).map_err(Error::NavigationFailed)?;
        let page = instance.lock().await.page.clone();

        page.goto(normalized.clone())
            .await
            .map_err(|e| Error::NavigationFailed(e.to_string()))?;

        let current = page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| normalized.clone());
        instance.lock().await.current_url = current.clone();

        info!(browser_id = %id, url = %current, "navigated");
        Ok(current)
    }

    /// Execute one input action against the instance.
    pub async fn execute(&self, id: &str, action: BrowserAction) -> Result<()> {
        let instance = self.checkout(id).await?;
        debug!(browser_id = %id, action = action.verb(), "executing input action");

        let page = instance.lock().await.page.clone();
        match action {
            BrowserAction::Click { x, y } => {
                click_at(&page, x, y, 1).await?;
                instance.lock().await.pointer = (x, y);
            },
            BrowserAction::DoubleClick { x, y } => {
                click_at(&page, x, y, 1).await?;
                click_at(&page, x, y, 2).await?;
                instance.lock().await.pointer = (x, y);
            },
            BrowserAction::MouseDown { button, x, y } => {
                let (x, y) = resolve_pointer(&instance, x, y).await;
                mouse_event(
                    &page,
                    DispatchMouseEventType::MousePressed,
                    x,
                    y,
                    Some(cdp_button(button)),
                    1,
                )
                .await?;
            },
            BrowserAction::MouseUp { button, x, y } => {
                let (x, y) = resolve_pointer(&instance, x, y).await;
                mouse_event(
                    &page,
                    DispatchMouseEventType::MouseReleased,
                    x,
                    y,
                    Some(cdp_button(button)),
                    1,
                )
                .await?;
            },
            BrowserAction::MouseMove { x, y } => {
                mouse_event(&page, DispatchMouseEventType::MouseMoved, x, y, None, 0).await?;
                instance.lock().await.pointer = (x, y);
            },
            BrowserAction::Type { text } => {
                for c in text.chars() {
                    let s = c.to_string();
                    key_event(&page, DispatchKeyEventType::KeyDown, &s, 0, Some(&s)).await?;
                    key_event(&page, DispatchKeyEventType::KeyUp, &s, 0, None).await?;
                }
            },
            BrowserAction::Key { key } => {
                let chord = parse_key_chord(&key)
                    .ok_or_else(|| Error::InvalidAction(format!("bad key chord: {key}")))?;
                key_event(
                    &page,
                    DispatchKeyEventType::KeyDown,
                    &chord.key,
                    chord.modifiers,
                    chord.text.as_deref(),
                )
                .await?;
                key_event(
                    &page,
                    DispatchKeyEventType::KeyUp,
                    &chord.key,
                    chord.modifiers,
                    None,
                )
                .await?;
            },
            BrowserAction::KeyDown { key } => {
                let chord = parse_key_chord(&key)
                    .ok_or_else(|| Error::InvalidAction(format!("bad key chord: {key}")))?;
                key_event(
                    &page,
                    DispatchKeyEventType::KeyDown,
                    &chord.key,
                    chord.modifiers,
                    chord.text.as_deref(),
                )
                .await?;
            },
            BrowserAction::KeyUp { key } => {
                let chord = parse_key_chord(&key)
                    .ok_or_else(|| Error::InvalidAction(format!("bad key chord: {key}")))?;
                key_event(
                    &page,
                    DispatchKeyEventType::KeyUp,
                    &chord.key,
                    chord.modifiers,
                    None,
                )
                .await?;
            },
            BrowserAction::Scroll { x, y } => {
                page.evaluate(format!("window.scrollTo({x}, {y})"))
                    .await
                    .map_err(|e| Error::ActionFailed(e.to_string()))?;
            },
            BrowserAction::ScrollBy { x, y } => {
                page.evaluate(format!("window.scrollBy({x}, {y})"))
                    .await
                    .map_err(|e| Error::ActionFailed(e.to_string()))?;
            },
            BrowserAction::Hover { text } => {
                let (x, y) = find_by_text(&page, &text).await?;
                mouse_event(&page, DispatchMouseEventType::MouseMoved, x, y, None, 0).await?;
                instance.lock().await.pointer = (x, y);
            },
            BrowserAction::Reload => {
                page.reload()
                    .await
                    .map_err(|e| Error::NavigationFailed(e.to_string()))?;
            },
            BrowserAction::GoBack => {
                page.evaluate("history.back()")
                    .await
                    .map_err(|e| Error::NavigationFailed(e.to_string()))?;
            },
            BrowserAction::GoForward => {
                page.evaluate("history.forward()")
                    .await
                    .map_err(|e| Error::NavigationFailed(e.to_string()))?;
            },
        }
        Ok(())
    }

    /// Resize the instance viewport via device-metrics override.
    pub async fn resize(&self, id: &str, width: u32, height: u32) -> Result<()> {
        let instance = self.checkout(id).await?;
        let page = instance.lock().await.page.clone();

        let cmd = SetDeviceMetricsOverrideParams::builder()
            .width(width)
            .height(height)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(Error::Cdp)?;
        page.execute(cmd).await?;

        instance.lock().await.viewport = Viewport { width, height };
        info!(browser_id = %id, width, height, "resized viewport");
        Ok(())
    }

    /// The last known URL of the instance.
    pub async fn current_url(&self, id: &str) -> Result<String> {
        let instance = self.checkout(id).await?;
        let page = instance.lock().await.page.clone();
        match page.url().await {
            Ok(Some(url)) => {
                instance.lock().await.current_url = url.clone();
                Ok(url)
            },
            Ok(None) => Ok(instance.lock().await.current_url.clone()),
            Err(e) => Err(Error::Cdp(e.to_string())),
        }
    }

    /// The viewport last applied to the instance.
    pub async fn viewport(&self, id: &str) -> Result<Viewport> {
        let inner = self.inner.read().await;
        let instance = inner
            .instances
            .get(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let viewport = instance.lock().await.viewport;
        Ok(viewport)
    }

    pub async fn list(&self) -> Vec<String> {
        self.inner.read().await.index.ids()
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.index.len()
    }

    /// Close every instance idle longer than the configured timeout. Safe to
    /// run concurrently with closes: removal is idempotent.
    pub async fn reap_idle(&self) -> usize {
        let Some(cutoff) = Instant::now().checked_sub(self.config.idle_timeout) else {
            return 0;
        };
        let idle = self.inner.read().await.index.idle_ids(cutoff);
        let mut closed = 0;
        for id in idle {
            if self.close(&id).await {
                warn!(browser_id = %id, "closed idle browser instance");
                closed += 1;
            }
        }
        closed
    }

    /// Shut down every instance.
    pub async fn close_all(&self) {
        let ids = self.list().await;
        for id in ids {
            self.close(&id).await;
        }
        info!("browser pool shut down");
    }

    /// Fetch an instance handle and record the activity.
    async fn checkout(&self, id: &str) -> Result<Arc<Mutex<PooledInstance>>> {
        let mut inner = self.inner.write().await;
        let instance = inner
            .instances
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        inner.index.touch(id, Instant::now());
        Ok(instance)
    }

    /// Launch a browser process and open its page at `url`.
    async fn launch(&self, url: &str, width: u32, height: u32) -> Result<PooledInstance> {
        let mut builder = CdpBrowserConfig::builder();
        if !self.config.headless {
            builder = builder.with_head();
        }
        builder = builder
            .viewport(chromiumoxide::handler::viewport::Viewport {
                width,
                height,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            })
            .request_timeout(self.config.navigation_timeout);
        if let Some(ref path) = self.config.chrome_path {
            builder = builder.chrome_executable(path);
        }
        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }
        builder = builder
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox");

        let config = builder.build().map_err(Error::LaunchFailed)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| Error::LaunchFailed(e.to_string()))?;

        // Drain CDP events for the lifetime of the connection.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "cdp handler closed");
                    break;
                }
            }
        });

        let page = browser
            .new_page(url)
            .await
            .map_err(|e| Error::LaunchFailed(e.to_string()))?;

        Ok(PooledInstance {
            browser,
            page,
            viewport: Viewport { width, height },
            current_url: url.to_string(),
            pointer: (0.0, 0.0),
        })
    }
}

// ── Instance helpers ─────────────────────────────────────────────────────────

async fn close_instance(id: &str, instance: Arc<Mutex<PooledInstance>>) {
    let mut guard = instance.lock().await;
    if let Err(e) = guard.browser.close().await {
        debug!(browser_id = %id, error = %e, "browser close reported an error");
    }
    // Process teardown completes when the handle drops.
}

async fn resolve_pointer(
    instance: &Arc<Mutex<PooledInstance>>,
    x: Option<f64>,
    y: Option<f64>,
) -> (f64, f64) {
    let pointer = instance.lock().await.pointer;
    (x.unwrap_or(pointer.0), y.unwrap_or(pointer.1))
}

fn cdp_button(button: MouseButton) -> CdpMouseButton {
    match button {
        MouseButton::Left => CdpMouseButton::Left,
        MouseButton::Right => CdpMouseButton::Right,
        MouseButton::Middle => CdpMouseButton::Middle,
    }
}

async fn click_at(page: &Page, x: f64, y: f64, click_count: i64) -> crate::error::Result<()> {
    mouse_event(
        page,
        DispatchMouseEventType::MousePressed,
        x,
        y,
        Some(CdpMouseButton::Left),
        click_count,
    )
    .await?;
    mouse_event(
        page,
        DispatchMouseEventType::MouseReleased,
        x,
        y,
        Some(CdpMouseButton::Left),
        click_count,
    )
    .await
}

async fn mouse_event(
    page: &Page,
    kind: DispatchMouseEventType,
    x: f64,
    y: f64,
    button: Option<CdpMouseButton>,
    click_count: i64,
) -> crate::error::Result<()> {
    let mut builder = DispatchMouseEventParams::builder().r#type(kind).x(x).y(y);
    if let Some(button) = button {
        builder = builder.button(button);
    }
    if click_count > 0 {
        builder = builder.click_count(click_count);
    }
    let params = builder.build().map_err(Error::Cdp)?;
    page.execute(params).await?;
    Ok(())
}

async fn key_event(
    page: &Page,
    kind: DispatchKeyEventType,
    key: &str,
    modifiers: i64,
    text: Option<&str>,
) -> crate::error::Result<()> {
    let mut builder = DispatchKeyEventParams::builder()
        .r#type(kind)
        .key(key.to_string());
    if modifiers != 0 {
        builder = builder.modifiers(modifiers);
    }
    if let Some(text) = text {
        builder = builder.text(text.to_string());
    }
    let params = builder.build().map_err(Error::Cdp)?;
    page.execute(params).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct HoverPoint {
    x: f64,
    y: f64,
}

/// Locate the first element whose visible text contains `needle` and return
/// its viewport center, scrolling it into view first.
async fn find_by_text(page: &Page, needle: &str) -> crate::error::Result<(f64, f64)> {
    let needle_json =
        serde_json::to_string(needle).map_err(|e| Error::ActionFailed(e.to_string()))?;
    let js = format!(
        r#"(() => {{
            const needle = {needle_json};
            const els = document.querySelectorAll(
                'a, button, input, select, textarea, label, [role], li, span, div, p, h1, h2, h3'
            );
            for (const el of els) {{
                const text = (el.innerText || el.value || '').trim();
                if (text && text.includes(needle)) {{
                    el.scrollIntoView({{ block: 'center' }});
                    const r = el.getBoundingClientRect();
                    return {{ x: r.x + r.width / 2, y: r.y + r.height / 2 }};
                }}
            }}
            return null;
        }})()"#
    );

    let found: Option<HoverPoint> = page
        .evaluate(js.as_str())
        .await
        .map_err(|e| Error::ActionFailed(e.to_string()))?
        .into_value()
        .map_err(|e| Error::ActionFailed(format!("{e:?}")))?;

    match found {
        Some(point) => Ok((point.x, point.y)),
        None => Err(Error::ElementNotFound(needle.to_string())),
    }
}

/// Generate a random instance id.
fn generate_instance_id() -> String {
    let mut rng = rand::rng();
    let id: u64 = rng.random();
    format!("browser-{id:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_ids_unique_and_prefixed() {
        let a = generate_instance_id();
        let b = generate_instance_id();
        assert_ne!(a, b);
        assert!(a.starts_with("browser-"));
    }

    #[test]
    fn launch_config_from_schema() {
        let mut cfg = periscope_config::schema::BrowserConfig::default();
        cfg.max_browsers = 3;
        cfg.idle_timeout_ms = 60_000;
        cfg.viewport_width = 1920;

        let launch = LaunchConfig::from(&cfg);
        assert_eq!(launch.max_browsers, 3);
        assert_eq!(launch.idle_timeout, std::time::Duration::from_secs(60));
        assert_eq!(launch.default_viewport.width, 1920);
    }

    #[tokio::test]
    async fn empty_pool_operations() {
        let pool = BrowserPool::new(LaunchConfig::default());
        assert_eq!(pool.count().await, 0);
        assert!(pool.list().await.is_empty());
        assert!(!pool.close("browser-missing").await);
        assert_eq!(pool.reap_idle().await, 0);

        match pool.current_url("browser-missing").await {
            Err(Error::NotFound(_)) => {},
            other => panic!("expected NotFound, got {other:?}"),
        }
        match pool
            .execute(
                "browser-missing",
                BrowserAction::Click { x: 1.0, y: 1.0 },
            )
            .await
        {
            Err(Error::NotFound(_)) => {},
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
}
