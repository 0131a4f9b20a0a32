use super::WorkQueue;

fn contents(queue: &WorkQueue<u32>) -> Vec<u32> {
    queue.iter().copied().collect()
}

#[test]
fn test_enqueue_is_fifo() {
    let mut queue = WorkQueue::new();
    for i in 1..=3 {
        queue.enqueue(i);
    }
    assert_eq!(queue.len(), 3);
    let batch: Vec<u32> = queue.drain_all().into_iter().collect();
    assert_eq!(batch, vec![1, 2, 3]);
}

#[test]
fn test_drain_all_empties_shared_queue() {
    let mut queue = WorkQueue::new();
    queue.enqueue(7);
    let batch = queue.drain_all();
    assert_eq!(batch.len(), 1);
    assert!(queue.is_empty());
    assert!(queue.drain_all().is_empty());
}

#[test]
fn test_requeue_front_goes_before_newer_items() {
    let mut queue = WorkQueue::new();
    queue.enqueue(1);
    queue.enqueue(2);
    queue.enqueue(3);

    let mut batch = queue.drain_all();
    assert_eq!(batch.pop_front(), Some(1));

    // enqueued by the caller while the worker was feeding
    queue.enqueue(4);
    queue.requeue_front(batch);

    assert_eq!(contents(&queue), vec![2, 3, 4]);
}

#[test]
fn test_requeue_empty_remainder_is_noop() {
    let mut queue = WorkQueue::new();
    queue.enqueue(9);
    queue.requeue_front(Default::default());
    assert_eq!(contents(&queue), vec![9]);
}

#[test]
fn test_clear_reports_dropped_count() {
    let mut queue = WorkQueue::new();
    queue.enqueue(1);
    queue.enqueue(2);
    assert_eq!(queue.clear(), 2);
    assert!(queue.is_empty());
}
