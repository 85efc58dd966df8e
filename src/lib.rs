/*! render_surfaces is the resource-management core of a GPU user-mode driver.

It owns the lifecycle of render targets and textures, decides how pixel data is laid out in
device memory, validates that a set of attachments forms a usable render target, and decides
whether an image transfer can run on the hardware transfer engine or must take the software
path.

Here is a quick chart of the pieces and where they live:

| Component                    | Module            | Owns                                                        | Fails by                                  |
|------------------------------|-------------------|-------------------------------------------------------------|-------------------------------------------|
| Memory layout math           | [`layout`]        | Mip offsets, cube face offsets, per-layout rules            | Never; callers pass valid geometry        |
| Attachment lifecycle manager | [`lifecycle`]     | Surface creation, sharing, flushing and teardown            | `false` or a logged warning               |
| Completeness engine          | [`completeness`]  | The framebuffer state machine and its cached draw state     | A [`framebuffer::FrameBufferStatus`]      |
| Transfer pipeline            | [`transfer`]      | Hardware upload/blit preparation and the software fallback  | [`transfer::RejectReason`] or [`transfer::TransferError`] |

# Surfaces and attachments

A [`framebuffer::FrameBuffer`] has three slots: color, depth and stencil.  Each slot holds an
[`attachment::Attachable`], which is either one `(face, level)` of a [`texture::Texture`] or a
renderbuffer.  When a framebuffer becomes complete the color attachable gets a
[`surface::RenderSurface`], the hardware's notion of a render target, and the depth and stencil
attachables share it.

Render surfaces are shared by reference count, but that count is the number of framebuffer
attachment points that reach the surface through a linked attachable, not the number of `Arc`s.  Only [`lifecycle`] changes it, and the
surface is flushed and destroyed with the kernel when it reaches zero.

# Ghosting

An image-sharing collaborator can swap a texture's backing allocation while framebuffers are
using it ([`texture::Texture::replace_allocation`], [`lifecycle::ghost_attachable`]).  Nothing
is re-linked eagerly.  The attachables are marked stale, and
[`completeness::get_completeness`] re-synchronizes them the next time the framebuffer is used.

# Talking to the hardware

Everything that reaches the kernel goes through [`transport::Transport`].  Waits on the hardware
are bounded polls against [`sync::SyncObject`] counters, never OS blocking primitives, so no
operation in this crate blocks indefinitely.  [`transport::loopback::LoopbackTransport`] runs the
whole crate in process.

```
use std::sync::Arc;
use render_surfaces::attachment::Attachable;
use render_surfaces::completeness::get_completeness;
use render_surfaces::config::DriverConfig;
use render_surfaces::context::{Context, ShareGroup};
use render_surfaces::framebuffer::{AttachmentSlot, FrameBuffer, FrameBufferStatus};
use render_surfaces::lifecycle::{bind_attachment, renderbuffer_storage};
use render_surfaces::pixel_formats::PixelFormat;
use render_surfaces::transport::loopback::LoopbackTransport;

let share_group = ShareGroup::new(Arc::new(LoopbackTransport::new()));
let ctx = Context::new(&share_group, DriverConfig::default());

let color = Attachable::renderbuffer(1);
renderbuffer_storage(&ctx, &color, 64, 64, PixelFormat::Rgba8888, 0).unwrap();
let framebuffer = FrameBuffer::new(1);
bind_attachment(&ctx, &framebuffer, AttachmentSlot::Color, Some(color));
assert_eq!(get_completeness(&ctx, &framebuffer), Ok(FrameBufferStatus::Complete));
```
*/

pub mod attachment;
mod bittricks;
pub mod completeness;
pub mod config;
pub mod context;
pub mod dirty_tracking;
pub mod error;
pub mod framebuffer;
pub mod layout;
pub mod lifecycle;
pub mod pixel_formats;
pub mod surface;
pub mod sync;
pub mod sys;
pub mod texture;
pub mod transfer;
pub mod transport;

pub use error::Error;

logwise::declare_logging_domain!();
