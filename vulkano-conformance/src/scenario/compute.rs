use super::{
    buffer_dependency, host_read_dependency, host_write_dependency, image_dependency, Context,
    ScenarioError,
};
use crate::{
    buffer::{Buffer, BufferUsage},
    command_buffer::{DescriptorSet, WriteDescriptorSet},
    device::QueueFlags,
    driver::Driver,
    image::{Image, ImageLayout, ImageUsage},
    memory::MemoryRequirement,
    oracle::{Shape, Verdict},
    random::Random,
    reference,
    shader::{
        templates::{self, InvertSource},
        ComputeShader,
    },
    sync::{AccessFlags, BufferMemoryBarrier, ImageMemoryBarrier, PipelineStages},
    ValidationError,
};

const UNIFORM_INVERT_SEED: u32 = 0x0111_223f;
const STORAGE_INVERT_SEED: u32 = 0x0012_4fef;
const IN_PLACE_INVERT_SEED: u32 = 0x0082_ce7f;
const IMAGE_TO_BUFFER_SEED: u32 = 0x000a_b2c7;
const BUFFER_TO_IMAGE_SEED: u32 = 0x7723_8ac2;

/// The base value that the barrier scenarios add workgroup indices to.
const BASE_VALUE: u32 = 127;

/// How the invert scenarios access their buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InvertKind {
    /// Reads a uniform buffer and writes a separate storage buffer.
    Uniform,

    /// Reads a storage buffer and writes a separate storage buffer.
    Storage,

    /// Inverts one storage buffer in place, declared as a sized array.
    InPlace,

    /// Inverts one storage buffer in place, declared as an unsized array.
    InPlaceUnsized,
}

/// Scenarios that exercise compute dispatches, and the dependencies between the dispatches of
/// one command buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComputeKind {
    /// Dispatches a shader that does nothing.
    EmptyShader,

    /// Complements `num_values` seeded words, partitioned evenly between all invocations.
    BufferInvert {
        kind: InvertKind,
        num_values: u32,
        local_size: [u32; 3],
        work_size: [u32; 3],
    },

    /// Writes increasing and decreasing indices into two buffers.
    WriteMultiple {
        sized: bool,
        num_values: u32,
        local_size: [u32; 3],
        work_size: [u32; 3],
    },

    /// Accumulates local indices into neighbouring words, across group barriers.
    LocalBarrier {
        local_size: [u32; 3],
        work_size: [u32; 3],
    },

    /// Reverses squared local indices through shared memory.
    SharedVar {
        local_size: [u32; 3],
        work_size: [u32; 3],
    },

    /// Counts the invocations of each workgroup with a shared atomic.
    SharedAtomic {
        local_size: [u32; 3],
        work_size: [u32; 3],
    },

    /// One dispatch writes a buffer, a second one sums it, with a buffer barrier in between.
    CommandBarrier { work_size: [u32; 3] },

    /// Copies seeded data into an image with a transfer, then back into a buffer with a shader.
    CopyImageToBuffer {
        local_size: [u32; 2],
        image_size: [u32; 2],
    },

    /// Copies seeded data into an image with a shader, then back into a buffer with a transfer.
    CopyBufferToImage {
        local_size: [u32; 2],
        image_size: [u32; 2],
    },

    /// Sums runs of `local_size` seeded words into the texels of an image with image atomics.
    ImageAtomic {
        local_size: u32,
        image_size: [u32; 2],
    },

    /// One dispatch writes an image, a second one sums it, with an image barrier and a layout
    /// transition in between.
    ImageBarrier { image_size: [u32; 2] },
}

impl ComputeKind {
    pub(super) fn validate(&self) -> Result<(), Box<ValidationError>> {
        match *self {
            ComputeKind::EmptyShader => Ok(()),
            ComputeKind::BufferInvert {
                num_values,
                local_size,
                work_size,
                ..
            }
            | ComputeKind::WriteMultiple {
                num_values,
                local_size,
                work_size,
                ..
            } => {
                let invocations = validate_sizes(local_size, work_size)?;

                if num_values == 0 || num_values % invocations != 0 {
                    return Err(ValidationError::new(
                        "num_values",
                        format!(
                            "{} values cannot be divided evenly between {} invocations",
                            num_values, invocations,
                        ),
                    ));
                }

                Ok(())
            }
            ComputeKind::LocalBarrier {
                local_size,
                work_size,
            }
            | ComputeKind::SharedVar {
                local_size,
                work_size,
            }
            | ComputeKind::SharedAtomic {
                local_size,
                work_size,
            } => validate_sizes(local_size, work_size).map(drop),
            ComputeKind::CommandBarrier { work_size } => {
                validate_non_zero("work_size", &work_size)?;
                checked_product("work_size", &work_size).map(drop)
            }
            ComputeKind::CopyImageToBuffer {
                local_size,
                image_size,
            }
            | ComputeKind::CopyBufferToImage {
                local_size,
                image_size,
            } => {
                validate_non_zero("local_size", &local_size)?;
                validate_non_zero("image_size", &image_size)?;
                checked_product("image_size", &image_size)?;

                if image_size[0] % local_size[0] != 0 || image_size[1] % local_size[1] != 0 {
                    return Err(ValidationError::new(
                        "image_size",
                        "is not a multiple of `local_size`",
                    ));
                }

                Ok(())
            }
            ComputeKind::ImageAtomic {
                local_size,
                image_size,
            } => {
                validate_non_zero("local_size", &[local_size])?;
                validate_non_zero("image_size", &image_size)?;
                checked_product("image_size", &[image_size[0], image_size[1], local_size])
                    .map(drop)
            }
            ComputeKind::ImageBarrier { image_size } => {
                validate_non_zero("image_size", &image_size)?;
                checked_product("image_size", &image_size).map(drop)
            }
        }
    }

    pub(super) fn execute(&self, ctx: &mut Context<'_, '_>) -> Result<Verdict, ScenarioError> {
        match *self {
            ComputeKind::EmptyShader => empty_shader(ctx),
            ComputeKind::BufferInvert {
                kind,
                num_values,
                local_size,
                work_size,
            } => buffer_invert(ctx, kind, num_values, local_size, work_size),
            ComputeKind::WriteMultiple {
                sized,
                num_values,
                local_size,
                work_size,
            } => write_multiple(ctx, sized, num_values, local_size, work_size),
            ComputeKind::LocalBarrier {
                local_size,
                work_size,
            } => single_output(
                ctx,
                templates::local_barrier(value_count(local_size, work_size), local_size),
                work_size,
                &reference::local_barrier(local_size, work_size),
            ),
            ComputeKind::SharedVar {
                local_size,
                work_size,
            } => single_output(
                ctx,
                templates::shared_var(value_count(local_size, work_size), local_size),
                work_size,
                &reference::shared_var(local_size, work_size),
            ),
            ComputeKind::SharedAtomic {
                local_size,
                work_size,
            } => single_output(
                ctx,
                templates::shared_atomic(value_count(local_size, work_size), local_size),
                work_size,
                &reference::shared_atomic(local_size, work_size),
            ),
            ComputeKind::CommandBarrier { work_size } => command_barrier(ctx, work_size),
            ComputeKind::CopyImageToBuffer {
                local_size,
                image_size,
            } => copy_image_to_buffer(ctx, local_size, image_size),
            ComputeKind::CopyBufferToImage {
                local_size,
                image_size,
            } => copy_buffer_to_image(ctx, local_size, image_size),
            ComputeKind::ImageAtomic {
                local_size,
                image_size,
            } => image_atomic(ctx, local_size, image_size),
            ComputeKind::ImageBarrier { image_size } => image_barrier(ctx, image_size),
        }
    }
}

fn validate_non_zero(context: &'static str, values: &[u32]) -> Result<(), Box<ValidationError>> {
    if values.contains(&0) {
        return Err(ValidationError::new(context, "contains zero"));
    }

    Ok(())
}

/// Returns the total number of invocations.
fn validate_sizes(
    local_size: [u32; 3],
    work_size: [u32; 3],
) -> Result<u32, Box<ValidationError>> {
    validate_non_zero("local_size", &local_size)?;
    validate_non_zero("work_size", &work_size)?;

    let [x, y, z] = local_size;
    let [gx, gy, gz] = work_size;

    checked_product("work_size", &[x, y, z, gx, gy, gz])
}

/// Returns the product of `values`, if it fits in a `u32`.
fn checked_product(context: &'static str, values: &[u32]) -> Result<u32, Box<ValidationError>> {
    values
        .iter()
        .try_fold(1u32, |product, &value| product.checked_mul(value))
        .ok_or_else(|| ValidationError::new(context, "has a total count that overflows `u32`"))
}

fn value_count(local_size: [u32; 3], work_size: [u32; 3]) -> u32 {
    local_size.iter().chain(&work_size).product()
}

fn compute_driver<'d>(ctx: &mut Context<'_, 'd>) -> Result<Driver<'d>, ScenarioError> {
    let queue = ctx.queue(QueueFlags::COMPUTE, &[])?;

    ctx.driver(queue)
}

fn empty_shader(ctx: &mut Context<'_, '_>) -> Result<Verdict, ScenarioError> {
    let shader = ctx.shader(templates::empty())?;
    let mut driver = compute_driver(ctx)?;

    driver
        .begin()?
        .dispatch(&shader, &DescriptorSet::default(), [1, 1, 1])?
        .submit(&[], &[])?;
    let _token = ctx.wait(&mut driver)?;

    Ok(Verdict::Pass)
}

fn buffer_invert(
    ctx: &mut Context<'_, '_>,
    kind: InvertKind,
    num_values: u32,
    local_size: [u32; 3],
    work_size: [u32; 3],
) -> Result<Verdict, ScenarioError> {
    let len = num_values as usize;
    let (seed, usage, access) = match kind {
        InvertKind::Uniform => (
            UNIFORM_INVERT_SEED,
            BufferUsage::UNIFORM_BUFFER,
            AccessFlags::UNIFORM_READ,
        ),
        InvertKind::Storage => (
            STORAGE_INVERT_SEED,
            BufferUsage::STORAGE_BUFFER,
            AccessFlags::SHADER_STORAGE_READ,
        ),
        InvertKind::InPlace | InvertKind::InPlaceUnsized => (
            IN_PLACE_INVERT_SEED,
            BufferUsage::STORAGE_BUFFER,
            AccessFlags::SHADER_STORAGE_READ | AccessFlags::SHADER_STORAGE_WRITE,
        ),
    };

    let input_data = Random::new(seed).words(len);
    let input = ctx.host_buffer(len, usage)?;
    ctx.write(input, &input_data)?;

    let (shader, output, descriptor_set) = match kind {
        InvertKind::Uniform | InvertKind::Storage => {
            let output = ctx.host_buffer(len, BufferUsage::STORAGE_BUFFER)?;
            let (source, input_write) = if kind == InvertKind::Uniform {
                (
                    InvertSource::UniformBuffer,
                    WriteDescriptorSet::uniform_buffer(0, input),
                )
            } else {
                (
                    InvertSource::StorageBuffer,
                    WriteDescriptorSet::storage_buffer(0, input),
                )
            };
            let shader = ctx.shader(templates::buffer_invert(source, num_values, local_size))?;
            let descriptor_set =
                DescriptorSet::new([input_write, WriteDescriptorSet::storage_buffer(1, output)])?;

            (shader, output, descriptor_set)
        }
        InvertKind::InPlace | InvertKind::InPlaceUnsized => {
            let sized = kind == InvertKind::InPlace;
            let shader = ctx.shader(templates::invert_in_place(num_values, sized, local_size))?;
            let descriptor_set =
                DescriptorSet::new([WriteDescriptorSet::storage_buffer(0, input)])?;

            (shader, input, descriptor_set)
        }
    };

    let mut driver = compute_driver(ctx)?;
    driver
        .begin()?
        .pipeline_barrier(&host_write_dependency(
            &[input],
            PipelineStages::COMPUTE_SHADER,
            access,
        ))?
        .dispatch(&shader, &descriptor_set, work_size)?
        .pipeline_barrier(&host_read_dependency(
            &[output],
            PipelineStages::COMPUTE_SHADER,
            AccessFlags::SHADER_STORAGE_WRITE,
        ))?
        .submit(&[], &[])?;
    let token = ctx.wait(&mut driver)?;

    ctx.verify(&token, output, Shape::Words, &reference::invert(&input_data))
}

fn write_multiple(
    ctx: &mut Context<'_, '_>,
    sized: bool,
    num_values: u32,
    local_size: [u32; 3],
    work_size: [u32; 3],
) -> Result<Verdict, ScenarioError> {
    let len = num_values as usize;
    let outputs = [
        ctx.host_buffer(len, BufferUsage::STORAGE_BUFFER)?,
        ctx.host_buffer(len, BufferUsage::STORAGE_BUFFER)?,
    ];
    let shader = ctx.shader(templates::write_multiple(num_values, sized, local_size))?;
    let descriptor_set = DescriptorSet::new([
        WriteDescriptorSet::storage_buffer(0, outputs[0]),
        WriteDescriptorSet::storage_buffer(1, outputs[1]),
    ])?;

    let mut driver = compute_driver(ctx)?;
    driver
        .begin()?
        .dispatch(&shader, &descriptor_set, work_size)?
        .pipeline_barrier(&host_read_dependency(
            &outputs,
            PipelineStages::COMPUTE_SHADER,
            AccessFlags::SHADER_STORAGE_WRITE,
        ))?
        .submit(&[], &[])?;
    let token = ctx.wait(&mut driver)?;

    let (first, second) = reference::write_multiple(num_values);

    Ok(ctx
        .verify(&token, outputs[0], Shape::Words, &first)?
        .and(ctx.verify(&token, outputs[1], Shape::Words, &second)?))
}

/// Runs a shader that writes one storage buffer at binding 0.
fn single_output(
    ctx: &mut Context<'_, '_>,
    shader: ComputeShader,
    work_size: [u32; 3],
    expected: &[u32],
) -> Result<Verdict, ScenarioError> {
    let output = ctx.host_buffer(expected.len(), BufferUsage::STORAGE_BUFFER)?;
    let shader = ctx.shader(shader)?;
    let descriptor_set = DescriptorSet::new([WriteDescriptorSet::storage_buffer(0, output)])?;

    let mut driver = compute_driver(ctx)?;
    driver
        .begin()?
        .dispatch(&shader, &descriptor_set, work_size)?
        .pipeline_barrier(&host_read_dependency(
            &[output],
            PipelineStages::COMPUTE_SHADER,
            AccessFlags::SHADER_STORAGE_WRITE,
        ))?
        .submit(&[], &[])?;
    let token = ctx.wait(&mut driver)?;

    ctx.verify(&token, output, Shape::Words, expected)
}

/// Creates the uniform buffer holding the base value, and the zeroed sum buffer.
fn base_and_sum(ctx: &mut Context<'_, '_>) -> Result<(Buffer, Buffer), ScenarioError> {
    let uniform = ctx.host_buffer(1, BufferUsage::UNIFORM_BUFFER)?;
    let sum = ctx.host_buffer(1, BufferUsage::STORAGE_BUFFER)?;
    ctx.write(uniform, &[BASE_VALUE])?;
    ctx.write(sum, &[0])?;

    Ok((uniform, sum))
}

fn record_base_and_sum_upload(
    driver: &mut Driver<'_>,
    uniform: Buffer,
    sum: Buffer,
) -> Result<(), ScenarioError> {
    driver
        .pipeline_barrier(&host_write_dependency(
            &[uniform],
            PipelineStages::COMPUTE_SHADER,
            AccessFlags::UNIFORM_READ,
        ))?
        .pipeline_barrier(&host_write_dependency(
            &[sum],
            PipelineStages::COMPUTE_SHADER,
            AccessFlags::SHADER_STORAGE_READ | AccessFlags::SHADER_STORAGE_WRITE,
        ))?;

    Ok(())
}

fn command_barrier(
    ctx: &mut Context<'_, '_>,
    work_size: [u32; 3],
) -> Result<Verdict, ScenarioError> {
    let groups: u32 = work_size.iter().product();
    let (uniform, sum) = base_and_sum(ctx)?;
    let work = ctx.buffer(
        groups as usize,
        BufferUsage::STORAGE_BUFFER,
        MemoryRequirement::ANY,
    )?;

    let write_shader = ctx.shader(templates::write_base_offset())?;
    let sum_shader = ctx.shader(templates::sum_buffer())?;
    let write_set = DescriptorSet::new([
        WriteDescriptorSet::storage_buffer(1, work),
        WriteDescriptorSet::uniform_buffer(2, uniform),
    ])?;
    let sum_set = DescriptorSet::new([
        WriteDescriptorSet::storage_buffer(0, sum),
        WriteDescriptorSet::storage_buffer(1, work),
    ])?;

    let mut driver = compute_driver(ctx)?;
    driver.begin()?;
    record_base_and_sum_upload(&mut driver, uniform, sum)?;
    driver
        .dispatch(&write_shader, &write_set, work_size)?
        .pipeline_barrier(&buffer_dependency(BufferMemoryBarrier {
            src_stages: PipelineStages::COMPUTE_SHADER,
            src_access: AccessFlags::SHADER_STORAGE_WRITE,
            dst_stages: PipelineStages::COMPUTE_SHADER,
            dst_access: AccessFlags::SHADER_STORAGE_READ,
            ..BufferMemoryBarrier::buffer(work)
        }))?
        .dispatch(&sum_shader, &sum_set, work_size)?
        .pipeline_barrier(&host_read_dependency(
            &[sum],
            PipelineStages::COMPUTE_SHADER,
            AccessFlags::SHADER_STORAGE_WRITE,
        ))?
        .submit(&[], &[])?;
    let token = ctx.wait(&mut driver)?;

    ctx.verify(
        &token,
        sum,
        Shape::Words,
        &[reference::base_offset_sum(BASE_VALUE, groups)],
    )
}

fn image_barrier(
    ctx: &mut Context<'_, '_>,
    image_size: [u32; 2],
) -> Result<Verdict, ScenarioError> {
    let [width, height] = image_size;
    let (uniform, sum) = base_and_sum(ctx)?;
    let image = ctx.image(image_size, ImageUsage::STORAGE)?;

    let write_shader = ctx.shader(templates::write_image_base_offset())?;
    let sum_shader = ctx.shader(templates::sum_image())?;
    let write_set = DescriptorSet::new([
        WriteDescriptorSet::storage_image(1, image, ImageLayout::General),
        WriteDescriptorSet::uniform_buffer(2, uniform),
    ])?;
    let sum_set = DescriptorSet::new([
        WriteDescriptorSet::storage_buffer(0, sum),
        WriteDescriptorSet::storage_image(1, image, ImageLayout::ShaderReadOnlyOptimal),
    ])?;

    let mut driver = compute_driver(ctx)?;
    driver.begin()?;
    record_base_and_sum_upload(&mut driver, uniform, sum)?;
    driver
        .pipeline_barrier(&image_dependency(ImageMemoryBarrier {
            dst_stages: PipelineStages::COMPUTE_SHADER,
            dst_access: AccessFlags::SHADER_STORAGE_WRITE,
            old_layout: ImageLayout::Undefined,
            new_layout: ImageLayout::General,
            ..ImageMemoryBarrier::image(image)
        }))?
        .dispatch(&write_shader, &write_set, [width, height, 1])?
        .pipeline_barrier(&image_dependency(ImageMemoryBarrier {
            src_stages: PipelineStages::COMPUTE_SHADER,
            src_access: AccessFlags::SHADER_STORAGE_WRITE,
            dst_stages: PipelineStages::COMPUTE_SHADER,
            dst_access: AccessFlags::SHADER_STORAGE_READ,
            old_layout: ImageLayout::General,
            new_layout: ImageLayout::ShaderReadOnlyOptimal,
            ..ImageMemoryBarrier::image(image)
        }))?
        .dispatch(&sum_shader, &sum_set, [width, height, 1])?
        .pipeline_barrier(&host_read_dependency(
            &[sum],
            PipelineStages::COMPUTE_SHADER,
            AccessFlags::SHADER_STORAGE_WRITE,
        ))?
        .submit(&[], &[])?;
    let token = ctx.wait(&mut driver)?;

    ctx.verify(
        &token,
        sum,
        Shape::Words,
        &[reference::base_offset_sum(BASE_VALUE, width * height)],
    )
}

fn copy_image_to_buffer(
    ctx: &mut Context<'_, '_>,
    local_size: [u32; 2],
    image_size: [u32; 2],
) -> Result<Verdict, ScenarioError> {
    let [width, height] = image_size;
    let texels = (width * height) as usize;
    let data = Random::new(IMAGE_TO_BUFFER_SEED).words(texels);

    let staging = ctx.host_buffer(texels, BufferUsage::TRANSFER_SRC)?;
    ctx.write(staging, &data)?;
    let image = ctx.image(image_size, ImageUsage::TRANSFER_DST | ImageUsage::STORAGE)?;
    let output = ctx.host_buffer(texels, BufferUsage::STORAGE_BUFFER)?;

    let shader = ctx.shader(templates::copy_image_to_buffer(local_size, image_size))?;
    let descriptor_set = DescriptorSet::new([
        WriteDescriptorSet::storage_buffer(0, output),
        WriteDescriptorSet::storage_image(1, image, ImageLayout::ShaderReadOnlyOptimal),
    ])?;

    let mut driver = compute_driver(ctx)?;
    driver
        .begin()?
        .pipeline_barrier(&host_write_dependency(
            &[staging],
            PipelineStages::ALL_TRANSFER,
            AccessFlags::TRANSFER_READ,
        ))?
        .pipeline_barrier(&image_dependency(ImageMemoryBarrier {
            dst_stages: PipelineStages::ALL_TRANSFER,
            dst_access: AccessFlags::TRANSFER_WRITE,
            old_layout: ImageLayout::Undefined,
            new_layout: ImageLayout::TransferDstOptimal,
            ..ImageMemoryBarrier::image(image)
        }))?
        .copy_buffer_to_image(staging, image, ImageLayout::TransferDstOptimal)?
        .pipeline_barrier(&image_dependency(ImageMemoryBarrier {
            src_stages: PipelineStages::ALL_TRANSFER,
            src_access: AccessFlags::TRANSFER_WRITE,
            dst_stages: PipelineStages::COMPUTE_SHADER,
            dst_access: AccessFlags::SHADER_STORAGE_READ,
            old_layout: ImageLayout::TransferDstOptimal,
            new_layout: ImageLayout::ShaderReadOnlyOptimal,
            ..ImageMemoryBarrier::image(image)
        }))?
        .dispatch(
            &shader,
            &descriptor_set,
            [width / local_size[0], height / local_size[1], 1],
        )?
        .pipeline_barrier(&host_read_dependency(
            &[output],
            PipelineStages::COMPUTE_SHADER,
            AccessFlags::SHADER_STORAGE_WRITE,
        ))?
        .submit(&[], &[])?;
    let token = ctx.wait(&mut driver)?;

    ctx.verify(&token, output, Shape::Texels { width }, &data)
}

fn copy_buffer_to_image(
    ctx: &mut Context<'_, '_>,
    local_size: [u32; 2],
    image_size: [u32; 2],
) -> Result<Verdict, ScenarioError> {
    let [width, height] = image_size;
    let texels = (width * height) as usize;
    let data = Random::new(BUFFER_TO_IMAGE_SEED).words(texels);

    let shader = templates::copy_buffer_to_image(local_size, image_size);
    let group_counts = [width / local_size[0], height / local_size[1], 1];

    image_write_and_read_back(ctx, shader, group_counts, image_size, &data, &data)
}

fn image_atomic(
    ctx: &mut Context<'_, '_>,
    local_size: u32,
    image_size: [u32; 2],
) -> Result<Verdict, ScenarioError> {
    let [width, height] = image_size;
    let len = (width * height * local_size) as usize;
    let data = Random::new(BUFFER_TO_IMAGE_SEED).words(len);
    let expected = reference::image_atomic(&data, local_size, image_size);

    let shader = templates::image_atomic_sum(local_size, image_size);

    image_write_and_read_back(ctx, shader, [width, height, 1], image_size, &data, &expected)
}

/// Runs a shader that reads `input` from a storage buffer at binding 0 and writes a storage
/// image at binding 1, then copies the image to a buffer and compares it with `expected`.
fn image_write_and_read_back(
    ctx: &mut Context<'_, '_>,
    shader: ComputeShader,
    group_counts: [u32; 3],
    image_size: [u32; 2],
    input: &[u32],
    expected: &[u32],
) -> Result<Verdict, ScenarioError> {
    let input_buffer = ctx.host_buffer(input.len(), BufferUsage::STORAGE_BUFFER)?;
    ctx.write(input_buffer, input)?;
    let image = ctx.image(image_size, ImageUsage::STORAGE | ImageUsage::TRANSFER_SRC)?;
    let output = ctx.host_buffer(expected.len(), BufferUsage::TRANSFER_DST)?;

    let shader = ctx.shader(shader)?;
    let descriptor_set = DescriptorSet::new([
        WriteDescriptorSet::storage_buffer(0, input_buffer),
        WriteDescriptorSet::storage_image(1, image, ImageLayout::General),
    ])?;

    let mut driver = compute_driver(ctx)?;
    driver
        .begin()?
        .pipeline_barrier(&host_write_dependency(
            &[input_buffer],
            PipelineStages::COMPUTE_SHADER,
            AccessFlags::SHADER_STORAGE_READ,
        ))?
        .pipeline_barrier(&image_dependency(ImageMemoryBarrier {
            dst_stages: PipelineStages::COMPUTE_SHADER,
            dst_access: AccessFlags::SHADER_STORAGE_WRITE,
            old_layout: ImageLayout::Undefined,
            new_layout: ImageLayout::General,
            ..ImageMemoryBarrier::image(image)
        }))?
        .dispatch(&shader, &descriptor_set, group_counts)?;
    record_image_read_back(&mut driver, image, output)?;
    driver.submit(&[], &[])?;
    let token = ctx.wait(&mut driver)?;

    ctx.verify(
        &token,
        output,
        Shape::Texels {
            width: image_size[0],
        },
        expected,
    )
}

/// Records the copy of an image that a shader wrote in the general layout into a host-visible
/// buffer.
fn record_image_read_back(
    driver: &mut Driver<'_>,
    image: Image,
    output: Buffer,
) -> Result<(), ScenarioError> {
    driver
        .pipeline_barrier(&image_dependency(ImageMemoryBarrier {
            src_stages: PipelineStages::COMPUTE_SHADER,
            src_access: AccessFlags::SHADER_STORAGE_WRITE,
            dst_stages: PipelineStages::ALL_TRANSFER,
            dst_access: AccessFlags::TRANSFER_READ,
            old_layout: ImageLayout::General,
            new_layout: ImageLayout::TransferSrcOptimal,
            ..ImageMemoryBarrier::image(image)
        }))?
        .copy_image_to_buffer(image, ImageLayout::TransferSrcOptimal, output)?
        .pipeline_barrier(&host_read_dependency(
            &[output],
            PipelineStages::ALL_TRANSFER,
            AccessFlags::TRANSFER_WRITE,
        ))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{run, Outcome, Scenario, ScenarioConfig, ScenarioKind};

    fn run_one(kind: ComputeKind) -> Outcome {
        let device = soft_device!();
        let scenario = Scenario::new("compute", ScenarioKind::Compute(kind));

        run(&device, &[scenario], &ScenarioConfig::default())
            .results
            .remove(0)
            .outcome
    }

    #[test]
    fn uneven_partitions_are_rejected() {
        let kind = ComputeKind::WriteMultiple {
            sized: true,
            num_values: 1024,
            local_size: [3, 1, 1],
            work_size: [1, 1, 1],
        };
        assert_eq!(
            kind.validate().unwrap_err().context,
            "num_values",
        );

        let kind = ComputeKind::CopyImageToBuffer {
            local_size: [3, 3],
            image_size: [64, 64],
        };
        assert!(kind.validate().is_err());
        assert!(ComputeKind::SharedVar {
            local_size: [1, 0, 1],
            work_size: [1, 1, 1],
        }
        .validate()
        .is_err());
    }

    #[test]
    fn oversized_configurations_are_rejected() {
        let kinds = [
            ComputeKind::BufferInvert {
                kind: InvertKind::Storage,
                num_values: 1024,
                local_size: [1024, 1024, 1],
                work_size: [1024, 4, 1],
            },
            ComputeKind::SharedAtomic {
                local_size: [65536, 1, 1],
                work_size: [65536, 1, 1],
            },
            ComputeKind::CommandBarrier {
                work_size: [u32::MAX, 2, 1],
            },
            ComputeKind::CopyBufferToImage {
                local_size: [1, 1],
                image_size: [65536, 65536],
            },
            ComputeKind::ImageAtomic {
                local_size: 8,
                image_size: [32768, 32768],
            },
            ComputeKind::ImageBarrier {
                image_size: [u32::MAX, u32::MAX],
            },
        ];

        for kind in kinds {
            let err = kind.validate().unwrap_err();
            assert!(err.problem.contains("overflows"), "{:?}: {}", kind, err);
        }

        assert!(matches!(
            run_one(ComputeKind::SharedVar {
                local_size: [65536, 1, 1],
                work_size: [1, 65536, 1],
            }),
            Outcome::Error(ScenarioError::InvalidConfiguration(_)),
        ));
    }

    #[test]
    fn invert_from_every_source() {
        for kind in [
            InvertKind::Uniform,
            InvertKind::Storage,
            InvertKind::InPlace,
            InvertKind::InPlaceUnsized,
        ] {
            let outcome = run_one(ComputeKind::BufferInvert {
                kind,
                num_values: 1024,
                local_size: [1, 4, 2],
                work_size: [2, 2, 4],
            });
            assert_eq!(outcome, Outcome::Pass, "{:?}", kind);
        }
    }

    #[test]
    fn shared_var_mirrors_squares() {
        let outcome = run_one(ComputeKind::SharedVar {
            local_size: [3, 2, 5],
            work_size: [1, 1, 1],
        });
        assert_eq!(outcome, Outcome::Pass);
    }

    #[test]
    fn barriers_between_dispatches() {
        assert_eq!(
            run_one(ComputeKind::CommandBarrier {
                work_size: [11, 5, 7]
            }),
            Outcome::Pass,
        );
        assert_eq!(
            run_one(ComputeKind::ImageBarrier {
                image_size: [64, 64]
            }),
            Outcome::Pass,
        );
    }

    #[test]
    fn image_round_trips() {
        assert_eq!(
            run_one(ComputeKind::CopyImageToBuffer {
                local_size: [2, 4],
                image_size: [64, 64],
            }),
            Outcome::Pass,
        );
        assert_eq!(
            run_one(ComputeKind::CopyBufferToImage {
                local_size: [1, 1],
                image_size: [64, 64],
            }),
            Outcome::Pass,
        );
        assert_eq!(
            run_one(ComputeKind::ImageAtomic {
                local_size: 8,
                image_size: [64, 64],
            }),
            Outcome::Pass,
        );
    }

    #[test]
    fn ignored_barriers_fail() {
        let device = faulty_device!(ignore_pipeline_barriers: true);
        let scenario = Scenario::new(
            "compute/command_barrier",
            ScenarioKind::Compute(ComputeKind::CommandBarrier {
                work_size: [4, 1, 1],
            }),
        );

        let report = run(&device, &[scenario], &ScenarioConfig::default());
        assert!(matches!(report.results[0].outcome, Outcome::Fail(_)));
    }
}
